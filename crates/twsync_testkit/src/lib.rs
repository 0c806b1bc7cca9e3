//! # twsync Testkit
//!
//! Test utilities for twsync.
//!
//! This crate provides:
//! - Property-based test generators using proptest
//! - A throwaway PKI minted with rcgen (root, intermediate, leaves)
//! - A loopback TLS server that speaks the taskd framing
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use twsync_testkit::prelude::*;
//!
//! #[test]
//! fn sync_against_loopback() {
//!     let pki = TestPki::new();
//!     let server = LoopbackServer::replying(
//!         ServerSetup::from_pki(&pki),
//!         Reply::Send(Message::sync_accepted(&Cursor::new("C1"), vec![])),
//!     );
//!     let transport = server.connect();
//!     // ... open a channel with pki.client_credentials()
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod generators;
pub mod pki;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::generators::*;
    pub use crate::init_test_logging;
    pub use crate::pki::*;
    pub use crate::server::*;
}

pub use generators::*;
pub use pki::*;
pub use server::*;

/// Installs a `tracing` subscriber for tests, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
