//! # twsync TLS
//!
//! Certificate validation and the mutual-TLS channel for taskd sync.
//!
//! This crate provides:
//! - Client credentials and trust anchors parsed from PEM or DER
//! - A certificate validator (chain, validity, signatures, identity, pin)
//! - A `Transport` abstraction with a TCP implementation
//! - `SecureChannel`, a blocking message channel with deadlines and
//!   cooperative cancellation
//!
//! ## Trust
//!
//! The server chain is always checked against the caller's anchors by the
//! validator, from inside the rustls handshake. There is no switch to skip
//! verification; a failed check aborts the handshake and closes the
//! transport.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use twsync_tls::{ChannelConfig, Credentials, SecureChannel, ServerAddress, TcpTransport, ValidatorConfig};
//!
//! let credentials = Credentials::from_pem(&cert_pem, &key_pem, &ca_pem)?;
//! let address: ServerAddress = "tasks.example.com:53589".parse()?;
//! let transport = TcpTransport::connect(&address, Duration::from_secs(10))?;
//! let config = ChannelConfig::new(address.host.clone());
//! let mut channel = SecureChannel::open(transport, &credentials, &ValidatorConfig::new(), &config)?;
//! channel.send(&request, config.write_timeout)?;
//! let reply = channel.receive(config.read_timeout)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod cancel;
mod channel;
mod credentials;
mod error;
mod transport;
mod validator;
mod verifier;

pub use cancel::CancelToken;
pub use channel::{ChannelConfig, SecureChannel, TlsVersions};
pub use credentials::{Credentials, TrustAnchors};
pub use error::{
    CertificateError, CertificateReason, ChannelError, ChannelResult, CredentialsError,
    HandshakeError,
};
pub use transport::{ServerAddress, TcpTransport, Transport, DEFAULT_PORT};
pub use validator::{validate, CertificateValidator, Fingerprint, ValidatorConfig};
