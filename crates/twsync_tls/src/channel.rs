//! Mutual-TLS channel carrying protocol messages.
//!
//! The rustls client session is driven by hand over a [`Transport`] so
//! every blocking step runs against a deadline and receive can observe a
//! [`CancelToken`] between short read slices.
//!
//! With TLS 1.3 the client finishes its handshake before the server has
//! checked the client certificate. `open` therefore waits for the server's
//! next record: session tickets mean the certificate was accepted, an
//! alert means it was refused and `open` fails.

use crate::cancel::CancelToken;
use crate::credentials::Credentials;
use crate::error::{ChannelError, ChannelResult, CredentialsError, HandshakeError};
use crate::transport::{Transport, TransportReader, TransportWriter};
use crate::validator::{CertificateValidator, ValidatorConfig};
use crate::verifier::PeerVerifier;
use rustls::version::{TLS12, TLS13};
use rustls::{ClientConfig, ClientConnection, ProtocolVersion, SupportedProtocolVersion};
use rustls_pki_types::ServerName;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use twsync_protocol::{CodecLimits, FrameDecoder, Message, MessageEncoder};

static TLS12_AND_TLS13: &[&SupportedProtocolVersion] = &[&TLS13, &TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&TLS13];
static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&TLS12];

const PLAINTEXT_CHUNK: usize = 16 * 1024;

/// TLS protocol versions the client offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsVersions {
    /// TLS 1.3, falling back to TLS 1.2.
    #[default]
    Tls12AndTls13,
    /// TLS 1.3 only.
    Tls13Only,
    /// TLS 1.2 only.
    Tls12Only,
}

impl TlsVersions {
    fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            TlsVersions::Tls12AndTls13 => TLS12_AND_TLS13,
            TlsVersions::Tls13Only => TLS13_ONLY,
            TlsVersions::Tls12Only => TLS12_ONLY,
        }
    }
}

/// Channel options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Name sent as SNI and, unless the validator sets one, the identity
    /// the server certificate must carry.
    pub server_name: String,
    /// Deadline for the whole handshake.
    pub handshake_timeout: Duration,
    /// Default deadline for receiving one message.
    pub read_timeout: Duration,
    /// Default deadline for sending one message.
    pub write_timeout: Duration,
    /// Longest single blocking read; bounds cancellation latency.
    pub read_slice: Duration,
    /// How long `open` waits for the server's verdict on the client
    /// certificate after a TLS 1.3 handshake. Silence is taken as
    /// acceptance.
    pub verdict_wait: Duration,
    /// Message size and record count limits.
    pub limits: CodecLimits,
    /// Offered protocol versions.
    pub versions: TlsVersions,
}

impl ChannelConfig {
    /// Creates a configuration for `server_name` with default timeouts.
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            handshake_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(30),
            read_slice: Duration::from_millis(100),
            verdict_wait: Duration::from_secs(2),
            limits: CodecLimits::default(),
            versions: TlsVersions::default(),
        }
    }

    /// Sets the handshake deadline.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the default receive deadline.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the default send deadline.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the read slice.
    pub fn with_read_slice(mut self, slice: Duration) -> Self {
        self.read_slice = slice;
        self
    }

    /// Sets how long `open` waits for the server's verdict on the client
    /// certificate with TLS 1.3.
    pub fn with_verdict_wait(mut self, wait: Duration) -> Self {
        self.verdict_wait = wait;
        self
    }

    /// Sets the codec limits.
    pub fn with_limits(mut self, limits: CodecLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the offered protocol versions.
    pub fn with_versions(mut self, versions: TlsVersions) -> Self {
        self.versions = versions;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// An authenticated, encrypted message channel to one server.
///
/// A failed operation closes the channel, except for codec errors that
/// leave the stream in step (see [`ChannelError::closes_channel`]). Once
/// closed, later calls return [`ChannelError::Closed`]. Dropping the
/// channel closes it.
pub struct SecureChannel<T: Transport> {
    conn: ClientConnection,
    transport: T,
    frames: FrameDecoder,
    encoder: MessageEncoder,
    config: ChannelConfig,
    cancel: CancelToken,
    open: bool,
}

impl<T: Transport> SecureChannel<T> {
    /// Performs the TLS handshake over `transport`.
    ///
    /// The server chain is checked by the certificate validator inside the
    /// handshake. On any failure the transport is closed before
    /// application data is exchanged.
    pub fn open(
        mut transport: T,
        credentials: &Credentials,
        validator: &ValidatorConfig,
        config: &ChannelConfig,
    ) -> Result<Self, HandshakeError> {
        let server_name = ServerName::try_from(config.server_name.clone())
            .map_err(|_| HandshakeError::InvalidServerName(config.server_name.clone()))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = Arc::new(PeerVerifier::new(
            CertificateValidator::with_provider(
                credentials.anchors().clone(),
                validator.clone(),
                provider.clone(),
            ),
            provider.clone(),
        ));

        let tls = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(config.versions.protocol_versions())
            .map_err(|e| HandshakeError::Protocol(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(verifier.clone())
            .with_client_auth_cert(credentials.cert_chain().to_vec(), credentials.key().clone_key())
            .map_err(|e| CredentialsError::Invalid(e.to_string()))?;

        let mut conn = ClientConnection::new(Arc::new(tls), server_name)
            .map_err(|e| HandshakeError::Protocol(e.to_string()))?;

        let deadline = Instant::now() + config.handshake_timeout;
        let mut result = drive_handshake(&mut conn, &mut transport, deadline);
        if result.is_ok() && conn.protocol_version() == Some(ProtocolVersion::TLSv1_3) {
            let until = deadline.min(Instant::now() + config.verdict_wait);
            result = await_verdict(&mut conn, &mut transport, until);
        }
        if let Err(err) = result {
            let err = match verifier.take_failure() {
                Some(failure) => HandshakeError::PeerValidation(failure),
                None => err,
            };
            warn!(server = %config.server_name, error = %err, "TLS handshake failed");
            if let Err(e) = transport.close() {
                debug!(error = %e, "transport close after failed handshake");
            }
            return Err(err);
        }

        info!(
            server = %config.server_name,
            version = ?conn.protocol_version(),
            suite = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
            "TLS session established"
        );

        Ok(Self {
            conn,
            transport,
            frames: FrameDecoder::new(config.limits),
            encoder: MessageEncoder::new(config.limits),
            config: config.clone(),
            cancel: CancelToken::new(),
            open: true,
        })
    }

    /// Replaces the token observed by blocking operations.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns a handle to the token observed by blocking operations.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Returns the channel options.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Returns true until the channel has been closed.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Encodes and sends one message.
    pub fn send(&mut self, message: &Message, timeout: Duration) -> ChannelResult<()> {
        self.ensure_open()?;
        let result = self.try_send(message, timeout);
        self.close_on_error(result)
    }

    /// Waits for one complete message.
    pub fn receive(&mut self, timeout: Duration) -> ChannelResult<Message> {
        self.ensure_open()?;
        let result = self.try_receive(timeout);
        self.close_on_error(result)
    }

    /// Sends `close_notify` if possible and closes the transport.
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        self.conn.send_close_notify();
        let deadline = Instant::now() + self.config.write_timeout;
        if let Err(e) = self.flush_tls(deadline) {
            debug!(error = %e, "close_notify not delivered");
        }
        if let Err(e) = self.transport.close() {
            debug!(error = %e, "transport close failed");
        }
        self.frames.clear();
        debug!(server = %self.config.server_name, "channel closed");
    }

    fn ensure_open(&self) -> ChannelResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(ChannelError::Closed)
        }
    }

    fn check_cancelled(&self) -> ChannelResult<()> {
        if self.cancel.is_cancelled() {
            Err(ChannelError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn close_on_error<R>(&mut self, result: ChannelResult<R>) -> ChannelResult<R> {
        match &result {
            Err(err) if err.closes_channel() => {
                warn!(server = %self.config.server_name, error = %err, "channel failed, closing");
                self.close();
            }
            Err(err) => {
                debug!(server = %self.config.server_name, error = %err, "message dropped");
            }
            Ok(_) => {}
        }
        result
    }

    fn try_send(&mut self, message: &Message, timeout: Duration) -> ChannelResult<()> {
        self.check_cancelled()?;
        let bytes = self.encoder.encode(message)?;
        let deadline = Instant::now() + timeout;

        // The plaintext buffer is bounded; drain it to the transport
        // between chunks.
        let mut offset = 0;
        while offset < bytes.len() {
            offset += self
                .conn
                .writer()
                .write(&bytes[offset..])
                .map_err(ChannelError::from_io)?;
            self.flush_tls(deadline)?;
        }

        debug!(kind = %message.kind(), bytes = bytes.len(), records = message.body().len(), "message sent");
        Ok(())
    }

    fn try_receive(&mut self, timeout: Duration) -> ChannelResult<Message> {
        let deadline = Instant::now() + timeout;
        let mut plaintext = vec![0u8; PLAINTEXT_CHUNK];

        loop {
            if let Some(message) = self.frames.decode_next()? {
                debug!(kind = %message.kind(), records = message.body().len(), "message received");
                return Ok(message);
            }
            self.check_cancelled()?;

            match self.conn.reader().read(&mut plaintext) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(n) => {
                    self.frames.extend(&plaintext[..n]);
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(ChannelError::from_io(e)),
            }

            let remaining = remaining(deadline).ok_or(ChannelError::Timeout)?;
            let mut reader = TransportReader {
                transport: &mut self.transport,
                timeout: remaining.min(self.config.read_slice),
            };
            match self.conn.read_tls(&mut reader) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(_) => {
                    self.conn
                        .process_new_packets()
                        .map_err(|e| ChannelError::Tls(e.to_string()))?;
                    self.flush_tls(deadline)?;
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(ChannelError::from_io(e)),
            }
        }
    }

    fn flush_tls(&mut self, deadline: Instant) -> ChannelResult<()> {
        while self.conn.wants_write() {
            let timeout = remaining(deadline).ok_or(ChannelError::Timeout)?;
            let mut writer = TransportWriter {
                transport: &mut self.transport,
                timeout,
            };
            self.conn
                .write_tls(&mut writer)
                .map_err(ChannelError::from_io)?;
        }
        Ok(())
    }
}

impl<T: Transport> Drop for SecureChannel<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Transport> std::fmt::Debug for SecureChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("server_name", &self.config.server_name)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|d| !d.is_zero())
}

fn drive_handshake<T: Transport>(
    conn: &mut ClientConnection,
    transport: &mut T,
    deadline: Instant,
) -> Result<(), HandshakeError> {
    while conn.is_handshaking() {
        flush_handshake(conn, transport, deadline)?;
        if !conn.is_handshaking() {
            break;
        }

        let timeout = remaining(deadline).ok_or(HandshakeError::Timeout)?;
        let mut reader = TransportReader {
            transport: &mut *transport,
            timeout,
        };
        match conn.read_tls(&mut reader) {
            Ok(0) => return Err(HandshakeError::PeerClosed),
            Ok(_) => {}
            Err(e) => return Err(handshake_io_error(e)),
        }

        if let Err(e) = conn.process_new_packets() {
            // Tell the server why, best effort.
            let _ = flush_handshake(conn, transport, deadline);
            return Err(HandshakeError::Protocol(e.to_string()));
        }
    }
    flush_handshake(conn, transport, deadline)
}

/// Reads the server's first record after a TLS 1.3 handshake.
///
/// A record that processes cleanly (tickets, or early data kept for
/// `receive`) or no record before `until` means the client certificate
/// was accepted. An alert or a closed connection means it was refused.
fn await_verdict<T: Transport>(
    conn: &mut ClientConnection,
    transport: &mut T,
    until: Instant,
) -> Result<(), HandshakeError> {
    let Some(timeout) = remaining(until) else {
        return Ok(());
    };
    let mut reader = TransportReader {
        transport: &mut *transport,
        timeout,
    };
    match conn.read_tls(&mut reader) {
        Ok(0) => Err(HandshakeError::PeerClosed),
        Ok(_) => match conn.process_new_packets() {
            Ok(_) => Ok(()),
            Err(e) => Err(HandshakeError::Protocol(e.to_string())),
        },
        Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            Ok(())
        }
        Err(e) => Err(handshake_io_error(e)),
    }
}

fn flush_handshake<T: Transport>(
    conn: &mut ClientConnection,
    transport: &mut T,
    deadline: Instant,
) -> Result<(), HandshakeError> {
    while conn.wants_write() {
        let timeout = remaining(deadline).ok_or(HandshakeError::Timeout)?;
        let mut writer = TransportWriter {
            transport: &mut *transport,
            timeout,
        };
        conn.write_tls(&mut writer).map_err(handshake_io_error)?;
    }
    Ok(())
}

fn handshake_io_error(err: io::Error) -> HandshakeError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => HandshakeError::Timeout,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => HandshakeError::PeerClosed,
        _ => HandshakeError::Io(err),
    }
}
