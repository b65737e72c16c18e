//! Blocking byte channel to the server.
//!
//! The protocol engine only needs `Read + Write`; [`PgStream`] is the
//! production channel (plain TCP, or TLS with the `tls` feature) and tests
//! substitute an in-memory one.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use micropg_core::Error;
use micropg_core::error::{ConnectionError, ConnectionErrorKind};

use crate::config::PgConfig;

/// TCP or TLS stream to a PostgreSQL server.
pub enum PgStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl std::fmt::Debug for PgStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PgStream::Plain(s) => f.debug_tuple("Plain").field(&s.peer_addr().ok()).finish(),
            #[cfg(feature = "tls")]
            PgStream::Tls(s) => f.debug_tuple("Tls").field(&s.sock.peer_addr().ok()).finish(),
        }
    }
}

impl PgStream {
    /// Open a TCP connection, honoring the configured timeout.
    #[allow(clippy::result_large_err)]
    pub fn connect(config: &PgConfig) -> Result<Self, Error> {
        let addr = config
            .socket_addr()
            .to_socket_addrs()
            .map_err(|e| {
                Error::config(format!(
                    "Invalid socket address {}: {}",
                    config.socket_addr(),
                    e
                ))
            })?
            .next()
            .ok_or_else(|| {
                Error::config(format!("No address found for {}", config.socket_addr()))
            })?;

        let stream = match config.timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(|e| {
            let kind = if e.kind() == ErrorKind::ConnectionRefused {
                ConnectionErrorKind::Refused
            } else {
                ConnectionErrorKind::Connect
            };
            Error::ConnectionLost(ConnectionError {
                kind,
                message: format!("Failed to connect to {}: {}", config.socket_addr(), e),
                source: Some(Box::new(e)),
            })
        })?;

        stream.set_nodelay(true).ok();
        stream.set_read_timeout(config.timeout).ok();
        stream.set_write_timeout(config.timeout).ok();

        Ok(PgStream::Plain(stream))
    }

    /// Whether the channel is encrypted.
    pub fn is_tls(&self) -> bool {
        match self {
            PgStream::Plain(_) => false,
            #[cfg(feature = "tls")]
            PgStream::Tls(_) => true,
        }
    }
}

impl Read for PgStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            PgStream::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            PgStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for PgStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            PgStream::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            PgStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            PgStream::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            PgStream::Tls(s) => s.flush(),
        }
    }
}

/// Fill `buf` completely from `stream`.
///
/// A zero-byte read before `buf` is full means the server went away.
#[allow(clippy::result_large_err)]
pub fn read_full<S: Read + ?Sized>(stream: &mut S, buf: &mut [u8]) -> Result<(), Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::connection(
                    ConnectionErrorKind::Disconnected,
                    "Connection closed by server",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(io_lost("read from", e)),
        }
    }
    Ok(())
}

/// Write `data` in full and flush it.
#[allow(clippy::result_large_err)]
pub fn write_all<S: Write + ?Sized>(stream: &mut S, data: &[u8]) -> Result<(), Error> {
    stream.write_all(data).map_err(|e| io_lost("write to", e))?;
    stream.flush().map_err(|e| io_lost("flush", e))
}

fn io_lost(action: &str, e: std::io::Error) -> Error {
    let message = if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) {
        format!("Timed out trying to {} server", action)
    } else {
        format!("Failed to {} server: {}", action, e)
    };
    Error::ConnectionLost(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message,
        source: Some(Box::new(e)),
    })
}
