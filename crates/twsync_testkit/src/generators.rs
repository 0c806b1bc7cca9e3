//! Property-based test generators using proptest.
//!
//! Field strategies deliberately favour the characters the record encoding
//! has to escape.

use proptest::prelude::*;
use twsync_protocol::{Account, Cursor, Message, MessageKind, Record};
use uuid::Uuid;

/// Strategy for text fields, weighted towards delimiters, separators,
/// backslashes and line breaks.
pub fn field_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            4 => prop::char::range('a', 'z'),
            1 => Just('\t'),
            1 => Just(':'),
            1 => Just('\\'),
            1 => Just('\n'),
            1 => Just('\r'),
            1 => Just('-'),
            1 => Just(' '),
            1 => any::<char>(),
        ],
        0..16,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

/// Strategy for non-empty text fields.
pub fn non_empty_field_strategy() -> impl Strategy<Value = String> {
    field_strategy().prop_filter("field must not be empty", |s| !s.is_empty())
}

/// Strategy for optional values; `None` encodes as the absent marker.
pub fn optional_field_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::weighted(0.8, field_strategy())
}

/// Strategy for task records.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (
        non_empty_field_strategy(),
        optional_field_strategy(),
        prop::collection::vec((non_empty_field_strategy(), optional_field_strategy()), 0..6),
    )
        .prop_map(|(id, marker, attributes)| {
            let mut record = Record::new(id);
            record.set_marker(marker);
            for (name, value) in attributes {
                record.set(name, value);
            }
            record
        })
}

/// Strategy for cursors that fit in a header value.
pub fn cursor_strategy() -> impl Strategy<Value = Cursor> {
    prop::string::string_regex("[A-Za-z0-9._~-]{0,40}")
        .expect("Invalid regex")
        .prop_map(Cursor::new)
}

/// Strategy for accounts.
pub fn account_strategy() -> impl Strategy<Value = Account> {
    (
        prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,15}").expect("Invalid regex"),
        prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,15}").expect("Invalid regex"),
        prop::array::uniform16(any::<u8>()),
    )
        .prop_map(|(org, user, key)| Account::new(org, user, Uuid::from_bytes(key)))
}

/// Strategy for extra header pairs that never collide with protocol
/// headers.
pub fn extra_header_strategy() -> impl Strategy<Value = (String, String)> {
    (
        prop::string::string_regex("x-[a-z]{1,10}").expect("Invalid regex"),
        prop::string::string_regex("[ -~]{0,30}").expect("Invalid regex"),
    )
}

/// Strategy for well-formed messages of every kind.
pub fn message_strategy() -> impl Strategy<Value = Message> {
    let records = || prop::collection::vec(record_strategy(), 0..8);
    let extras = prop::collection::vec(extra_header_strategy(), 0..3);
    let body = prop_oneof![
        (account_strategy(), cursor_strategy(), records())
            .prop_map(|(account, cursor, records)| Message::sync_request(&account, &cursor, records)),
        (cursor_strategy(), records())
            .prop_map(|(cursor, records)| Message::sync_accepted(&cursor, records)),
        account_strategy().prop_map(|account| Message::statistics_request(&account)),
        (400u16..600, "[a-z ]{0,20}").prop_map(|(code, status)| Message::error(code, status)),
        records().prop_map(|records| Message::new(MessageKind::Status).with_records(records)),
    ];
    (body, extras).prop_map(|(mut message, extras)| {
        for (key, value) in extras {
            message.headers_mut().insert(key, value);
        }
        message
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
