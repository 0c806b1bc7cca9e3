//! Error types for the sync engine.

use crate::session::SessionState;
use std::io;
use thiserror::Error;
use twsync_protocol::{CodecError, MessageKind, RejectReason};
use twsync_tls::{ChannelError, HandshakeError};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync round.
#[derive(Error, Debug)]
pub enum SyncError {
    /// TCP connection could not be established.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// TLS handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The channel failed while sending or receiving.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A received message is not a valid sync response.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The server refused the request.
    #[error("server rejected the request: {reason}")]
    Rejected {
        /// Reason given by the server.
        reason: RejectReason,
        /// Status code, if the server sent one.
        code: Option<u16>,
    },

    /// The server answered with an error message.
    #[error("server error {code}: {status}")]
    ServerError {
        /// taskd status code.
        code: u16,
        /// Status text.
        status: String,
    },

    /// The server answered with a message of the wrong kind.
    #[error("unexpected {kind} message, expected {expected}")]
    UnexpectedMessage {
        /// Kind received.
        kind: MessageKind,
        /// Kind expected.
        expected: MessageKind,
    },

    /// The response replays more records than the session accepts.
    #[error("response carries {count} records, limit is {limit}")]
    TooManyRecords {
        /// Records in the response.
        count: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Applying a replayed record failed.
    #[error("applying record {id} failed: {source}")]
    Apply {
        /// Identifier of the record.
        id: String,
        /// Store failure.
        #[source]
        source: Box<SyncError>,
    },

    /// The sync store failed.
    #[error("store error: {0}")]
    Store(String),

    /// A session step was called out of order.
    #[error("invalid state transition from {from} via {step}")]
    InvalidStateTransition {
        /// State the session was in.
        from: SessionState,
        /// Step that was attempted.
        step: &'static str,
    },

    /// The round was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Returns true if the same round may succeed on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Connect(_) => true,
            SyncError::Handshake(e) => matches!(
                e,
                HandshakeError::Timeout | HandshakeError::PeerClosed | HandshakeError::Io(_)
            ),
            SyncError::Channel(e) => e.is_transient(),
            SyncError::ServerError { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Returns true if the server refused the cursor the client sent.
    pub fn is_stale_cursor(&self) -> bool {
        matches!(
            self,
            SyncError::Rejected {
                reason: RejectReason::StaleCursor,
                ..
            }
        )
    }
}
