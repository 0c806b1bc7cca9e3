//! A loopback taskd stand-in for handshake and end-to-end tests.
//!
//! The server runs on its own thread, accepts connections one at a time on
//! `127.0.0.1`, requires a client certificate, and answers every decoded
//! message through a handler closure.

use crate::pki::{Identity, TestPki};
use parking_lot::Mutex;
use rustls::server::WebPkiClientVerifier;
use rustls::version::{TLS12, TLS13};
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned, SupportedProtocolVersion};
use rustls_pki_types::CertificateDer;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use twsync_protocol::{encode, FrameDecoder, Message};
use twsync_tls::{ServerAddress, TcpTransport};

static ALL_VERSIONS: &[&SupportedProtocolVersion] = &[&TLS13, &TLS12];
static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&TLS12];

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_SLICE: Duration = Duration::from_millis(50);

/// What the server does after receiving a message.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Encode and send a message.
    Send(Message),
    /// Send raw bytes as application data.
    Raw(Vec<u8>),
    /// Send nothing and keep the connection open.
    Hang,
    /// Send `close_notify` and drop the connection.
    Close,
}

/// Server-side TLS setup.
#[derive(Debug, Clone)]
pub struct ServerSetup {
    /// Chain and key the server presents.
    pub identity: Identity,
    /// Roots accepted for client certificates.
    pub client_roots: Vec<CertificateDer<'static>>,
    /// Restrict the server to TLS 1.2.
    pub tls12_only: bool,
}

impl ServerSetup {
    /// Presents the PKI's server identity and trusts its root for clients.
    pub fn from_pki(pki: &TestPki) -> Self {
        Self {
            identity: pki.server.clone(),
            client_roots: vec![pki.root.der()],
            tls12_only: false,
        }
    }

    /// Replaces the presented identity.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Replaces the client roots.
    pub fn with_client_roots(mut self, roots: Vec<CertificateDer<'static>>) -> Self {
        self.client_roots = roots;
        self
    }

    /// Restricts the server to TLS 1.2.
    pub fn tls12_only(mut self) -> Self {
        self.tls12_only = true;
        self
    }

    fn server_config(&self) -> Arc<ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut roots = RootCertStore::empty();
        for root in &self.client_roots {
            roots.add(root.clone()).expect("client root is usable");
        }
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .expect("client verifier");
        let versions = if self.tls12_only { TLS12_ONLY } else { ALL_VERSIONS };
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(versions)
            .expect("protocol versions")
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.identity.chain(), self.identity.key())
            .expect("server certificate");
        // Tickets tell a TLS 1.3 client that its certificate passed.
        config.send_tls13_tickets = 2;
        Arc::new(config)
    }
}

type Handler = Box<dyn FnMut(&Message) -> Reply + Send>;

#[derive(Default)]
struct Shared {
    received: Mutex<Vec<Message>>,
    failures: Mutex<Vec<String>>,
    connections: Mutex<usize>,
}

/// A TLS server thread bound to an ephemeral loopback port.
///
/// Dropping the server stops the thread.
pub struct LoopbackServer {
    address: SocketAddr,
    shutdown: Arc<AtomicBool>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl LoopbackServer {
    /// Starts a server that answers every message with `handler`.
    pub fn start<F>(setup: ServerSetup, handler: F) -> Self
    where
        F: FnMut(&Message) -> Reply + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        listener
            .set_nonblocking(true)
            .expect("nonblocking listener");
        let address = listener.local_addr().expect("listener address");
        let config = setup.server_config();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared::default());

        let thread = {
            let shutdown = shutdown.clone();
            let shared = shared.clone();
            let handler: Handler = Box::new(handler);
            thread::spawn(move || accept_loop(listener, config, handler, &shutdown, &shared))
        };

        tracing::debug!(%address, "loopback server started");
        Self {
            address,
            shutdown,
            shared,
            thread: Some(thread),
        }
    }

    /// Starts a server that replies to everything with `reply`.
    pub fn replying(setup: ServerSetup, reply: Reply) -> Self {
        Self::start(setup, move |_| reply.clone())
    }

    /// Returns the bound socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        self.address
    }

    /// Returns the bound address as a server address on `127.0.0.1`.
    pub fn address(&self) -> ServerAddress {
        ServerAddress::new("127.0.0.1", self.address.port())
    }

    /// Opens a TCP transport to the server.
    pub fn connect(&self) -> TcpTransport {
        TcpTransport::connect(&self.address(), Duration::from_secs(5))
            .expect("connect to loopback server")
    }

    /// Returns the messages received so far, in order.
    pub fn received(&self) -> Vec<Message> {
        self.shared.received.lock().clone()
    }

    /// Returns the errors that ended connections, in order.
    pub fn failures(&self) -> Vec<String> {
        self.shared.failures.lock().clone()
    }

    /// Returns the number of accepted connections.
    pub fn connections(&self) -> usize {
        *self.shared.connections.lock()
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    mut handler: Handler,
    shutdown: &AtomicBool,
    shared: &Shared,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                *shared.connections.lock() += 1;
                tracing::debug!(%peer, "loopback connection accepted");
                if let Err(e) = serve(stream, &config, &mut handler, shutdown, shared) {
                    tracing::debug!(%peer, error = %e, "loopback connection failed");
                    shared.failures.lock().push(e.to_string());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                shared.failures.lock().push(e.to_string());
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn serve(
    stream: TcpStream,
    config: &Arc<ServerConfig>,
    handler: &mut Handler,
    shutdown: &AtomicBool,
    shared: &Shared,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_SLICE))?;
    let conn = ServerConnection::new(config.clone()).map_err(io::Error::other)?;
    let mut tls = StreamOwned::new(conn, stream);
    let mut frames = FrameDecoder::default();
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        while let Some(message) = frames.decode_next().map_err(io::Error::other)? {
            shared.received.lock().push(message.clone());
            match handler(&message) {
                Reply::Send(reply) => {
                    let bytes = encode(&reply).map_err(io::Error::other)?;
                    tls.write_all(&bytes)?;
                    tls.flush()?;
                }
                Reply::Raw(bytes) => {
                    tls.write_all(&bytes)?;
                    tls.flush()?;
                }
                Reply::Hang => {}
                Reply::Close => {
                    tls.conn.send_close_notify();
                    tls.flush()?;
                    return Ok(());
                }
            }
        }

        match tls.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => frames.extend(&buf[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if shutdown.load(Ordering::SeqCst) {
                    return Ok(());
                }
            }
            Err(e) => return Err(e),
        }
    }
}
