//! Message decoder.
//!
//! Decoding is a single forward pass over one frame: length prefix,
//! header lines up to the blank line, then one record per body line.

use crate::error::{CodecError, CodecResult};
use crate::headers::{names, Headers};
use crate::limits::{CodecLimits, LENGTH_PREFIX_SIZE};
use crate::message::{
    parse_version_tag, Message, MessageKind, MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION,
};
use crate::record::Record;

/// Decode one complete frame with the default limits.
///
/// # Errors
///
/// Returns `Incomplete` when `bytes` is shorter than the declared length,
/// `Framing` when the prefix is out of range or bytes trail the frame, and
/// `Malformed` or `UnsupportedVersion` for invalid content.
pub fn decode(bytes: &[u8]) -> CodecResult<Message> {
    MessageDecoder::new(CodecLimits::default()).decode(bytes)
}

/// Reads the length prefix at the start of `bytes`.
///
/// Returns the total frame length, prefix included, once the prefix has
/// been validated against `limits`.
pub fn frame_length(bytes: &[u8], limits: &CodecLimits) -> CodecResult<usize> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return Err(CodecError::Incomplete {
            needed: LENGTH_PREFIX_SIZE - bytes.len(),
        });
    }
    let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if declared < LENGTH_PREFIX_SIZE {
        return Err(CodecError::framing(format!(
            "declared length {declared} is smaller than the length prefix"
        )));
    }
    if declared > limits.max_message_size {
        return Err(CodecError::framing(format!(
            "declared length {declared} exceeds the maximum of {}",
            limits.max_message_size
        )));
    }
    Ok(declared)
}

/// Decodes length-prefixed frames into messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDecoder {
    limits: CodecLimits,
}

impl MessageDecoder {
    /// Creates a decoder enforcing `limits`.
    pub fn new(limits: CodecLimits) -> Self {
        Self { limits }
    }

    /// Returns the limits this decoder enforces.
    pub fn limits(&self) -> &CodecLimits {
        &self.limits
    }

    /// Decodes exactly one frame occupying all of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> CodecResult<Message> {
        let declared = frame_length(bytes, &self.limits)?;
        if bytes.len() < declared {
            return Err(CodecError::Incomplete {
                needed: declared - bytes.len(),
            });
        }
        if bytes.len() > declared {
            return Err(CodecError::framing(format!(
                "{} bytes trail the declared length of {declared}",
                bytes.len() - declared
            )));
        }
        self.decode_payload(&bytes[LENGTH_PREFIX_SIZE..])
    }

    /// Decodes the bytes that follow a validated length prefix.
    pub(crate) fn decode_payload(&self, payload: &[u8]) -> CodecResult<Message> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| CodecError::malformed(format!("message is not valid UTF-8: {e}")))?;

        let (headers, body) = split_headers(text)?;
        check_version(&headers)?;
        let kind = message_kind(&headers)?;
        check_required(kind, &headers)?;
        let records = self.parse_body(body)?;

        Ok(Message::from_parts(kind, headers, records))
    }

    fn parse_body(&self, body: &str) -> CodecResult<Vec<Record>> {
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let Some(body) = body.strip_suffix('\n') else {
            return Err(CodecError::malformed("last record line is not terminated"));
        };

        let count = body.matches('\n').count() + 1;
        if count > self.limits.max_records {
            return Err(CodecError::malformed(format!(
                "body has {count} records, limit is {}",
                self.limits.max_records
            )));
        }

        body.split('\n').map(Record::parse_line).collect()
    }
}

fn split_headers(text: &str) -> CodecResult<(Headers, &str)> {
    let mut headers = Headers::new();
    let mut rest = text;
    loop {
        let Some(end) = rest.find('\n') else {
            return Err(CodecError::malformed(
                "header section is not terminated by a blank line",
            ));
        };
        let line = &rest[..end];
        rest = &rest[end + 1..];
        if line.is_empty() {
            return Ok((headers, rest));
        }
        let (key, value) = line
            .split_once(": ")
            .ok_or_else(|| CodecError::malformed(format!("header line '{line}' has no ': '")))?;
        if key.is_empty() {
            return Err(CodecError::malformed("header line has an empty key"));
        }
        headers.insert(key, value);
    }
}

fn check_version(headers: &Headers) -> CodecResult<()> {
    let tag = headers
        .get(names::PROTOCOL)
        .ok_or_else(|| CodecError::malformed("missing required header 'protocol'"))?;
    match parse_version_tag(tag) {
        Some(v) if (MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&v) => Ok(()),
        _ => Err(CodecError::UnsupportedVersion {
            found: tag.to_string(),
            min: MIN_SUPPORTED_VERSION,
            max: MAX_SUPPORTED_VERSION,
        }),
    }
}

fn message_kind(headers: &Headers) -> CodecResult<MessageKind> {
    let tag = headers
        .get(names::TYPE)
        .ok_or_else(|| CodecError::malformed("missing required header 'type'"))?;
    MessageKind::from_tag(tag)
        .ok_or_else(|| CodecError::malformed(format!("unknown message type '{tag}'")))
}

fn check_required(kind: MessageKind, headers: &Headers) -> CodecResult<()> {
    match missing_header(kind, headers) {
        Some(name) => Err(CodecError::malformed(format!(
            "{kind} message is missing required header '{name}'"
        ))),
        None => Ok(()),
    }
}

/// Returns the first header `kind` requires that `headers` lacks.
///
/// Shared by both directions so that everything the encoder emits the
/// decoder accepts.
pub(crate) fn missing_header(kind: MessageKind, headers: &Headers) -> Option<&'static str> {
    match kind {
        MessageKind::RequestSync if !headers.contains(names::CURSOR) => Some(names::CURSOR),
        MessageKind::ResponseSync => match headers.get(names::STATUS) {
            None => Some(names::STATUS),
            Some(status) => {
                let accepted = status.eq_ignore_ascii_case("ok");
                (accepted && !headers.contains(names::CURSOR)).then_some(names::CURSOR)
            }
        },
        _ => None,
    }
}
