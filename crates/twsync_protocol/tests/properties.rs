//! Property tests for the message codec.

use proptest::prelude::*;
use twsync_protocol::{
    decode, encode, CodecError, Cursor, FrameDecoder, Message, MessageKind, Record, ABSENT_MARKER,
    LENGTH_PREFIX_SIZE,
};
use twsync_testkit::generators::{
    field_strategy, message_strategy, non_empty_field_strategy, optional_field_strategy,
    record_strategy, PropTestConfig,
};

/// Returns the body lines of an encoded single-record message.
fn body_line(record: &Record) -> String {
    let frame = encode(&Message::sync_accepted(&Cursor::new("C"), vec![record.clone()])).unwrap();
    let text = std::str::from_utf8(&frame[LENGTH_PREFIX_SIZE..]).unwrap();
    let (_, body) = text.split_once("\n\n").unwrap();
    body.to_string()
}

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn decode_inverts_encode(message in message_strategy()) {
        let frame = encode(&message).unwrap();
        prop_assert_eq!(decode(&frame).unwrap(), message);
    }

    #[test]
    fn length_prefix_counts_whole_frame(message in message_strategy()) {
        let frame = encode(&message).unwrap();
        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        prop_assert_eq!(declared, frame.len());
    }

    #[test]
    fn escaped_record_line_has_one_terminator(record in record_strategy()) {
        let line = body_line(&record);
        prop_assert!(line.ends_with('\n'));
        prop_assert_eq!(line.matches('\n').count(), 1);
        prop_assert!(!line.contains('\r'));
    }

    #[test]
    fn delimiters_count_matches_fields(record in record_strategy()) {
        // Escaped fields never contain a raw tab, so tabs split fields exactly.
        let line = body_line(&record);
        let tabs = line.matches('\t').count();
        prop_assert_eq!(tabs, 1 + record.attributes().len());
    }

    #[test]
    fn special_characters_survive_in_every_position(
        id in non_empty_field_strategy(),
        marker in optional_field_strategy(),
        name in non_empty_field_strategy(),
        value in optional_field_strategy(),
        other in field_strategy(),
    ) {
        let mut record = Record::new(id);
        record.set_marker(marker);
        record.set(name, value);
        record.set(format!("{other}\\:\t"), Some(other.clone()));
        let message = Message::sync_accepted(&Cursor::new("C1"), vec![record]);

        let decoded = decode(&encode(&message).unwrap()).unwrap();
        prop_assert_eq!(decoded, message);
    }
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn byte_at_a_time_delivery(message in message_strategy()) {
        let frame = encode(&message).unwrap();
        let mut decoder = FrameDecoder::default();

        for (i, byte) in frame.iter().enumerate() {
            let prefix = &frame[..i];
            match decode(prefix) {
                Err(CodecError::Incomplete { needed }) => prop_assert!(needed > 0),
                other => prop_assert!(false, "prefix of {} bytes decoded as {:?}", i, other),
            }
            prop_assert_eq!(decoder.decode_next().unwrap(), None);
            decoder.extend(&[*byte]);
        }

        prop_assert_eq!(decoder.decode_next().unwrap(), Some(message));
        prop_assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn concatenated_frames_split_back(messages in prop::collection::vec(message_strategy(), 1..5)) {
        let mut stream = Vec::new();
        for message in &messages {
            stream.extend(encode(message).unwrap());
        }

        let mut decoder = FrameDecoder::default();
        decoder.extend(&stream);
        for message in messages {
            prop_assert_eq!(decoder.decode_next().unwrap(), Some(message));
        }
        prop_assert_eq!(decoder.decode_next().unwrap(), None);
    }
}

#[test]
fn absent_values_use_the_marker() {
    let record = Record::new("T1").with_removed_attribute("due");
    let line = body_line(&record);
    assert_eq!(line, format!("T1\t{ABSENT_MARKER}\tdue:{ABSENT_MARKER}\n"));
}

#[test]
fn empty_and_absent_values_differ() {
    let record = Record::new("T1")
        .with_marker("")
        .with_attribute("project", "")
        .with_removed_attribute("due");
    let message = Message::sync_accepted(&Cursor::new("C1"), vec![record.clone()]);
    let decoded = decode(&encode(&message).unwrap()).unwrap();
    let got = &decoded.body()[0];
    assert_eq!(got.marker(), Some(""));
    assert_eq!(got.attribute("project"), Some(Some("")));
    assert_eq!(got.attribute("due"), Some(None));
    assert_eq!(got, &record);
}

#[test]
fn literal_dash_field_is_not_absent() {
    let record = Record::new("-").with_attribute("note", "\\-");
    let line = body_line(&record);
    assert_eq!(line, format!("-\t{ABSENT_MARKER}\tnote:\\\\-\n"));
    let message = Message::sync_accepted(&Cursor::new("C1"), vec![record.clone()]);
    assert_eq!(decode(&encode(&message).unwrap()).unwrap().body(), &[record]);
}

#[test]
fn whatever_encodes_also_decodes() {
    let kinds = [
        MessageKind::RequestSync,
        MessageKind::ResponseSync,
        MessageKind::Error,
        MessageKind::Status,
    ];
    for kind in kinds {
        let bare = Message::new(kind);
        let with_status = Message::new(kind).with_header("status", "ok");
        let complete = Message::new(kind)
            .with_header("status", "ok")
            .with_header("cursor", "C1");
        for message in [bare, with_status, complete] {
            if let Ok(frame) = encode(&message) {
                assert_eq!(decode(&frame).unwrap(), message, "{kind}");
            }
        }
    }
}
