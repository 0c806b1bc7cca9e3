//! Typed view of a sync response.

use crate::error::{CodecError, CodecResult};
use crate::headers::names;
use crate::message::{Cursor, Message, MessageKind};
use crate::record::Record;
use std::fmt;

/// Why the server refused a sync request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The cursor is unknown to the server or too old to replay from.
    StaleCursor,
    /// The request carried more records than the server accepts.
    BatchTooLarge,
    /// The account credentials were not accepted.
    Unauthorized,
    /// Any other reason, verbatim.
    Other(String),
}

impl RejectReason {
    /// Parses a `reason` header value.
    pub fn parse(reason: &str) -> Self {
        match reason.trim().to_ascii_lowercase().as_str() {
            "stale-cursor" => RejectReason::StaleCursor,
            "batch-too-large" => RejectReason::BatchTooLarge,
            "unauthorized" => RejectReason::Unauthorized,
            _ => RejectReason::Other(reason.to_string()),
        }
    }

    /// Returns the `reason` header value.
    pub fn as_str(&self) -> &str {
        match self {
            RejectReason::StaleCursor => "stale-cursor",
            RejectReason::BatchTooLarge => "batch-too-large",
            RejectReason::Unauthorized => "unauthorized",
            RejectReason::Other(reason) => reason,
        }
    }

    /// Returns the taskd status code conventionally sent with this reason.
    pub fn code(&self) -> u16 {
        match self {
            RejectReason::Unauthorized => 430,
            RejectReason::BatchTooLarge => 504,
            RejectReason::StaleCursor | RejectReason::Other(_) => 500,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome declared by a sync response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The request was accepted; the client may advance to `cursor`.
    Accepted {
        /// New cursor to persist after the replay is applied.
        cursor: Cursor,
    },
    /// The request was refused.
    Rejected {
        /// Reason given by the server.
        reason: RejectReason,
    },
}

/// A decoded `response-sync` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    /// Declared outcome.
    pub outcome: SyncOutcome,
    /// Numeric taskd status code, if present.
    pub code: Option<u16>,
    /// Server identification, if present.
    pub server: Option<String>,
    /// Replayed mutations the client has not seen yet.
    pub records: Vec<Record>,
}

impl SyncResponse {
    /// Interprets a message as a sync response.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the message is not a `response-sync`, its
    /// status is unknown, an accepted response lacks a cursor, or the code
    /// is not numeric.
    pub fn from_message(message: Message) -> CodecResult<Self> {
        if message.kind() != MessageKind::ResponseSync {
            return Err(CodecError::malformed(format!(
                "expected a response-sync message, got {}",
                message.kind()
            )));
        }
        let (_, headers, records) = message.into_parts();

        let code = match headers.get(names::CODE) {
            Some(code) => Some(code.trim().parse::<u16>().map_err(|_| {
                CodecError::malformed(format!("status code '{code}' is not numeric"))
            })?),
            None => None,
        };
        let server = headers.get(names::SERVER).map(str::to_string);

        let status = headers
            .get(names::STATUS)
            .ok_or_else(|| CodecError::malformed("missing required header 'status'"))?;

        let outcome = if status.eq_ignore_ascii_case("ok") {
            let cursor = headers
                .get(names::CURSOR)
                .map(Cursor::new)
                .ok_or_else(|| CodecError::malformed("accepted response carries no cursor"))?;
            SyncOutcome::Accepted { cursor }
        } else if status.eq_ignore_ascii_case("rejected") {
            let reason = headers
                .get(names::REASON)
                .map(RejectReason::parse)
                .unwrap_or_else(|| RejectReason::Other("unspecified".into()));
            SyncOutcome::Rejected { reason }
        } else {
            return Err(CodecError::malformed(format!(
                "unknown sync status '{status}'"
            )));
        };

        Ok(Self {
            outcome,
            code,
            server,
            records,
        })
    }

    /// Returns true if the server accepted the request.
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Accepted { .. })
    }
}
