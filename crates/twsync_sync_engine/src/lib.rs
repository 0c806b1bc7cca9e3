//! # twsync Sync Engine
//!
//! Client-side sync rounds against a taskd server.
//!
//! This crate provides:
//! - `SyncSession`, the state machine for one sync attempt
//! - The `SyncStore` trait hosts implement, plus `MemorySyncStore`
//! - The `SyncChannel` seam over `SecureChannel`, with a scripted
//!   `MockChannel` for tests
//! - `connect` and `request_statistics` helpers
//!
//! ## Round
//!
//! A round reads the committed cursor and the oldest pending local
//! records, sends them in one request, applies the replayed records from
//! the response, acknowledges the sent batch and finally commits the new
//! cursor. Any failure before the commit leaves the old cursor in place,
//! so the next round replays an overlapping range; stores must apply
//! records idempotently.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use twsync_sync_engine::{connect, MemorySyncStore, SyncConfig, SyncSession};
//!
//! let config = SyncConfig::new(address, account).with_validator(validator);
//! let mut channel = connect(&config, &credentials)?;
//! let mut store = MemorySyncStore::new();
//! let report = SyncSession::new(&mut channel, &mut store, &config).run()?;
//! println!("sent {}, received {}", report.sent, report.received);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod session;
mod statistics;
mod store;
mod transport;

pub use config::{SyncConfig, DEFAULT_MAX_BATCH};
pub use error::{SyncError, SyncResult};
pub use session::{RoundReport, SessionState, SyncSession};
pub use statistics::request_statistics;
pub use store::{MemorySyncStore, SyncStore, Task};
pub use transport::{connect, MockChannel, MockReply, SyncChannel};
