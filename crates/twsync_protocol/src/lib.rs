//! # twsync Protocol
//!
//! Wire format and message codec for the taskd sync protocol.
//!
//! This crate provides:
//! - `Message` with ordered, case-insensitive headers and a record body
//! - `Record` task mutations with an escaped line encoding
//! - One-shot `encode`/`decode` and a streaming `FrameDecoder`
//! - A typed `SyncResponse` view of server replies
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Wire Format
//!
//! ```text
//! [u32 big-endian total length, prefix included]
//! key: value\n          one per header field, in order
//! \n                    blank line ends the header
//! <record line>\n       zero or more
//! ```
//!
//! ## Usage
//!
//! ```
//! use twsync_protocol::{decode, encode, Cursor, Message, Record};
//!
//! let message = Message::sync_accepted(
//!     &Cursor::new("C1"),
//!     vec![Record::new("T1").with_attribute("description", "buy milk")],
//! );
//! let bytes = encode(&message).unwrap();
//! assert_eq!(decode(&bytes).unwrap(), message);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod frame;
mod headers;
mod limits;
mod message;
mod record;
mod response;

pub use decoder::{decode, frame_length, MessageDecoder};
pub use encoder::{encode, MessageEncoder};
pub use error::{CodecError, CodecResult};
pub use frame::FrameDecoder;
pub use headers::{names, Headers};
pub use limits::{CodecLimits, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_RECORDS, LENGTH_PREFIX_SIZE};
pub use message::{
    client_id, parse_version_tag, version_tag, Account, Cursor, Message, MessageKind,
    MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION, PROTOCOL_VERSION,
};
pub use record::{Record, ABSENT_MARKER, ESCAPE, KEY_VALUE_SEPARATOR, RECORD_DELIMITER};
pub use response::{RejectReason, SyncOutcome, SyncResponse};
