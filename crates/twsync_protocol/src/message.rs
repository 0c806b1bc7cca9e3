//! Protocol messages.

use crate::headers::{names, Headers};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Protocol version written by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Lowest protocol version accepted when decoding.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

/// Highest protocol version accepted when decoding.
pub const MAX_SUPPORTED_VERSION: u32 = 1;

/// Client identification sent in the `client` header.
pub fn client_id() -> String {
    format!("twsync {}", env!("CARGO_PKG_VERSION"))
}

/// Formats a version number as it appears in the `protocol` header.
pub fn version_tag(version: u32) -> String {
    format!("v{version}")
}

/// Parses a `protocol` header value such as `v1`.
pub fn parse_version_tag(tag: &str) -> Option<u32> {
    let digits = tag.strip_prefix('v').or_else(|| tag.strip_prefix('V'))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// The kind of a message, carried in the `type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Client request to exchange mutations.
    RequestSync,
    /// Server reply to a sync request.
    ResponseSync,
    /// Server-side failure report.
    Error,
    /// Account statistics request or reply.
    Status,
}

impl MessageKind {
    /// Returns the `type` header value for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::RequestSync => "request-sync",
            MessageKind::ResponseSync => "response-sync",
            MessageKind::Error => "error",
            MessageKind::Status => "status",
        }
    }

    /// Parses a `type` header value, ignoring ASCII case.
    pub fn from_tag(tag: &str) -> Option<Self> {
        [
            MessageKind::RequestSync,
            MessageKind::ResponseSync,
            MessageKind::Error,
            MessageKind::Status,
        ]
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(tag))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque synchronization cursor.
///
/// The token means "everything the client has already received". It is
/// stored and replayed verbatim; an empty token requests a full replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    /// Wraps a token received from the server.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The cursor of a client that has never synchronized.
    pub fn initial() -> Self {
        Self(String::new())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the initial cursor.
    pub fn is_initial(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Cursor {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account identity sent with every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Organization the user belongs to.
    pub organization: String,
    /// User name.
    pub user: String,
    /// Secret account key issued by the server.
    pub key: Uuid,
}

impl Account {
    /// Creates an account identity.
    pub fn new(organization: impl Into<String>, user: impl Into<String>, key: Uuid) -> Self {
        Self {
            organization: organization.into(),
            user: user.into(),
            key,
        }
    }

    /// Writes the `org`, `user` and `key` headers.
    pub fn write_headers(&self, headers: &mut Headers) {
        headers.insert(names::ORG, self.organization.clone());
        headers.insert(names::USER, self.user.clone());
        headers.insert(names::KEY, self.key.to_string());
    }
}

/// A single protocol unit exchanged in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    headers: Headers,
    body: Vec<Record>,
}

impl Message {
    /// Creates a message of `kind` with `type` and `protocol` headers set.
    pub fn new(kind: MessageKind) -> Self {
        let mut headers = Headers::new();
        headers.insert(names::TYPE, kind.as_str());
        headers.insert(names::PROTOCOL, version_tag(PROTOCOL_VERSION));
        Self {
            kind,
            headers,
            body: Vec::new(),
        }
    }

    /// Assembles a message from decoded parts.
    pub(crate) fn from_parts(kind: MessageKind, headers: Headers, body: Vec<Record>) -> Self {
        Self {
            kind,
            headers,
            body,
        }
    }

    /// Builds a sync request carrying `cursor` and the outbound `records`.
    pub fn sync_request(account: &Account, cursor: &Cursor, records: Vec<Record>) -> Self {
        let mut message = Self::new(MessageKind::RequestSync);
        message.headers.insert(names::CLIENT, client_id());
        account.write_headers(&mut message.headers);
        message.headers.insert(names::CURSOR, cursor.as_str());
        message.body = records;
        message
    }

    /// Builds an account statistics request.
    pub fn statistics_request(account: &Account) -> Self {
        let mut message = Self::new(MessageKind::Status);
        message.headers.insert(names::CLIENT, client_id());
        account.write_headers(&mut message.headers);
        message
    }

    /// Builds a successful sync response with the replayed `records`.
    pub fn sync_accepted(cursor: &Cursor, records: Vec<Record>) -> Self {
        let mut message = Self::new(MessageKind::ResponseSync);
        message.headers.insert(names::CODE, "200");
        message.headers.insert(names::STATUS, "ok");
        message.headers.insert(names::CURSOR, cursor.as_str());
        message.body = records;
        message
    }

    /// Builds a sync response that refuses the request.
    pub fn sync_rejected(reason: &crate::response::RejectReason) -> Self {
        let mut message = Self::new(MessageKind::ResponseSync);
        message.headers.insert(names::CODE, reason.code().to_string());
        message.headers.insert(names::STATUS, "rejected");
        message.headers.insert(names::REASON, reason.as_str());
        message
    }

    /// Builds an error message.
    pub fn error(code: u16, status: impl Into<String>) -> Self {
        let mut message = Self::new(MessageKind::Error);
        message.headers.insert(names::CODE, code.to_string());
        message.headers.insert(names::STATUS, status.into());
        message
    }

    /// Adds a header, builder style.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Appends records to the body, builder style.
    pub fn with_records(mut self, records: impl IntoIterator<Item = Record>) -> Self {
        self.body.extend(records);
        self
    }

    /// Returns the message kind.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Returns the header fields.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the header fields for modification.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns one header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Returns the body records.
    pub fn body(&self) -> &[Record] {
        &self.body
    }

    /// Appends one record to the body.
    pub fn push_record(&mut self, record: Record) {
        self.body.push(record);
    }

    /// Returns the `cursor` header as a cursor.
    pub fn cursor(&self) -> Option<Cursor> {
        self.headers.get(names::CURSOR).map(Cursor::new)
    }

    /// Splits the message into its parts.
    pub fn into_parts(self) -> (MessageKind, Headers, Vec<Record>) {
        (self.kind, self.headers, self.body)
    }
}
