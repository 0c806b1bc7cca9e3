//! Blocking byte transports with per-call deadlines.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

/// Port taskd listens on by default.
pub const DEFAULT_PORT: u16 = 53589;

/// Socket timeouts cannot be zero; shorter requests are rounded up.
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// A bidirectional byte stream the secure channel runs over.
///
/// A read or write that does not finish within `timeout` fails with
/// [`io::ErrorKind::TimedOut`]. A read returning `Ok(0)` means the peer
/// closed its side.
pub trait Transport: Send {
    /// Reads some bytes into `buf`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Writes all of `buf`.
    fn write_all(&mut self, buf: &[u8], timeout: Duration) -> io::Result<()>;

    /// Closes both directions. Further calls fail.
    fn close(&mut self) -> io::Result<()>;
}

/// Host and port of a taskd server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Host name or IP address. Also the default TLS identity.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ServerAddress {
    /// Creates an address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerAddress {
    type Err = String;

    /// Parses `host`, `host:port` or `[ipv6]:port`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("unterminated IPv6 address in '{text}'"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(format!("unexpected text after address in '{text}'")),
            };
            return Ok(Self::new(host, port));
        }
        let (host, port) = match text.split_once(':') {
            Some((host, port)) => (host, parse_port(port)?),
            None => (text, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err("server host must not be empty".into());
        }
        Ok(Self::new(host, port))
    }
}

fn parse_port(text: &str) -> Result<u16, String> {
    text.parse()
        .map_err(|_| format!("'{text}' is not a valid port"))
}

/// [`Transport`] over a TCP socket.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl TcpTransport {
    /// Wraps a connected stream.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Resolves `address` and connects to the first reachable socket.
    pub fn connect(address: &ServerAddress, timeout: Duration) -> io::Result<Self> {
        let mut last_error = None;
        for addr in (address.host.as_str(), address.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout.max(MIN_SOCKET_TIMEOUT)) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    tracing::debug!(%address, %addr, "connected");
                    return Ok(Self::new(stream));
                }
                Err(e) => {
                    tracing::debug!(%address, %addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{address} did not resolve to any socket address"),
            )
        }))
    }

    /// Returns the underlying stream.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let timeout = timeout.max(MIN_SOCKET_TIMEOUT);
        if self.read_timeout != Some(timeout) {
            self.stream.set_read_timeout(Some(timeout))?;
            self.read_timeout = Some(timeout);
        }
        self.stream.read(buf).map_err(normalize_timeout)
    }

    fn write_all(&mut self, buf: &[u8], timeout: Duration) -> io::Result<()> {
        let timeout = timeout.max(MIN_SOCKET_TIMEOUT);
        if self.write_timeout != Some(timeout) {
            self.stream.set_write_timeout(Some(timeout))?;
            self.write_timeout = Some(timeout);
        }
        self.stream.write_all(buf).map_err(normalize_timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

/// Platforms report socket timeouts as `WouldBlock` or `TimedOut`.
fn normalize_timeout(err: io::Error) -> io::Error {
    if err.kind() == io::ErrorKind::WouldBlock {
        io::Error::new(io::ErrorKind::TimedOut, err)
    } else {
        err
    }
}

/// Adapts a transport to [`io::Read`] for one bounded read.
pub(crate) struct TransportReader<'a, T: ?Sized> {
    pub(crate) transport: &'a mut T,
    pub(crate) timeout: Duration,
}

impl<T: Transport + ?Sized> Read for TransportReader<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.transport.read(buf, self.timeout)
    }
}

/// Adapts a transport to [`io::Write`]; every write is complete.
pub(crate) struct TransportWriter<'a, T: ?Sized> {
    pub(crate) transport: &'a mut T,
    pub(crate) timeout: Duration,
}

impl<T: Transport + ?Sized> Write for TransportWriter<'_, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.transport.write_all(buf, self.timeout)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
