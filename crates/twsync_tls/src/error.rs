//! Error types for certificate validation and the secure channel.

use std::fmt;
use std::io;
use thiserror::Error;
use twsync_protocol::CodecError;

/// Result type for secure channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Why a peer certificate chain was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateReason {
    /// The chain does not lead to a trust anchor.
    UntrustedChain,
    /// A certificate in the chain is past its validity period.
    Expired,
    /// A certificate in the chain is not valid yet.
    NotYetValid,
    /// A signature in the chain does not verify.
    BadSignature,
    /// The leaf does not name the expected server.
    IdentityMismatch,
    /// The leaf fingerprint differs from the pinned one.
    PinMismatch,
    /// A certificate could not be parsed or is unusable.
    Malformed,
}

impl fmt::Display for CertificateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CertificateReason::UntrustedChain => "untrusted chain",
            CertificateReason::Expired => "certificate expired",
            CertificateReason::NotYetValid => "certificate not yet valid",
            CertificateReason::BadSignature => "bad signature",
            CertificateReason::IdentityMismatch => "identity mismatch",
            CertificateReason::PinMismatch => "pin mismatch",
            CertificateReason::Malformed => "malformed certificate",
        };
        f.write_str(text)
    }
}

/// A peer certificate chain failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}: {detail}")]
pub struct CertificateError {
    /// Classified cause.
    pub reason: CertificateReason,
    /// Human-readable detail.
    pub detail: String,
}

impl CertificateError {
    /// Creates a certificate error.
    pub fn new(reason: CertificateReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Client credentials could not be loaded or used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialsError {
    /// PEM input contained no certificate.
    #[error("no certificate found in PEM input")]
    NoCertificate,

    /// PEM input contained no private key.
    #[error("no private key found in PEM input")]
    NoPrivateKey,

    /// PEM input could not be parsed.
    #[error("invalid PEM: {0}")]
    Pem(String),

    /// The material parsed but cannot be used.
    #[error("invalid credentials: {0}")]
    Invalid(String),
}

/// The TLS handshake did not complete.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// TLS protocol failure, including an alert from the peer.
    #[error("TLS protocol failure: {0}")]
    Protocol(String),

    /// The server certificate chain was refused.
    #[error("server certificate rejected: {0}")]
    PeerValidation(#[from] CertificateError),

    /// The peer closed the connection before the handshake finished.
    #[error("peer closed the connection during the handshake")]
    PeerClosed,

    /// The handshake did not finish before its deadline.
    #[error("handshake timed out")]
    Timeout,

    /// Transport failure.
    #[error("transport error during handshake: {0}")]
    Io(#[source] io::Error),

    /// Client certificate or key cannot be used.
    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    /// The configured server name is not a valid DNS name or IP address.
    #[error("invalid server name '{0}'")]
    InvalidServerName(String),
}

/// A secure channel operation failed. The channel is closed afterwards.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Io(#[source] io::Error),

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The operation did not finish before its deadline.
    #[error("channel operation timed out")]
    Timeout,

    /// The channel is closed, locally or by the peer.
    #[error("channel is closed")]
    Closed,

    /// The operation was cancelled.
    #[error("channel operation cancelled")]
    Cancelled,

    /// TLS record layer failure after the handshake.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl ChannelError {
    /// Maps an I/O error, folding timeouts into [`ChannelError::Timeout`].
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ChannelError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ChannelError::Closed,
            _ => ChannelError::Io(err),
        }
    }

    /// Returns true if the channel cannot be used after this error.
    ///
    /// A codec error that leaves the frame boundaries intact only spoils
    /// one message: an unencodable message was never written, and a
    /// malformed frame has already been consumed.
    pub fn closes_channel(&self) -> bool {
        match self {
            ChannelError::Codec(e) => e.desynchronizes_stream(),
            _ => true,
        }
    }

    /// Returns true if a fresh connection may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChannelError::Io(_) | ChannelError::Timeout | ChannelError::Closed
        )
    }
}
