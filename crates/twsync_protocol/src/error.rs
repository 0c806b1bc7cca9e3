//! Error types for the codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes are available than the frame needs.
    ///
    /// This is not corruption: the caller should wait for more bytes
    /// and decode again.
    #[error("incomplete message: {needed} more bytes required")]
    Incomplete {
        /// Number of additional bytes required before decoding can proceed.
        needed: usize,
    },

    /// The length prefix does not describe the available bytes.
    #[error("framing error: {message}")]
    Framing {
        /// Description of the framing error.
        message: String,
    },

    /// The frame is complete but its content violates the wire format.
    #[error("malformed message: {message}")]
    Malformed {
        /// Description of what is malformed.
        message: String,
    },

    /// The header declares a protocol version this codec cannot speak.
    #[error("unsupported protocol version '{found}', supported range is v{min}..=v{max}")]
    UnsupportedVersion {
        /// The version string found in the header.
        found: String,
        /// Lowest supported version.
        min: u32,
        /// Highest supported version.
        max: u32,
    },

    /// A message cannot be represented on the wire.
    #[error("encoding failed: {message}")]
    Encoding {
        /// Description of the encoding error.
        message: String,
    },
}

impl CodecError {
    /// Create a framing error.
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    /// Create a malformed message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Create an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Returns true if more input may turn this into a successful decode.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Incomplete { .. })
    }

    /// Returns true if the error means the byte stream can no longer be
    /// split into frames reliably.
    pub fn desynchronizes_stream(&self) -> bool {
        matches!(self, CodecError::Framing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_is_not_fatal() {
        assert!(CodecError::Incomplete { needed: 3 }.is_incomplete());
        assert!(!CodecError::malformed("x").is_incomplete());
    }

    #[test]
    fn only_framing_desynchronizes() {
        assert!(CodecError::framing("bad prefix").desynchronizes_stream());
        assert!(!CodecError::malformed("bad header").desynchronizes_stream());
        assert!(!CodecError::encoding("bad value").desynchronizes_stream());
    }

    #[test]
    fn error_display() {
        let err = CodecError::UnsupportedVersion {
            found: "v7".into(),
            min: 1,
            max: 1,
        };
        assert_eq!(
            err.to_string(),
            "unsupported protocol version 'v7', supported range is v1..=v1"
        );
    }
}
