//! Error types for micropg operations.

use std::fmt;

/// The primary error type for all micropg operations.
#[derive(Debug)]
pub enum Error {
    /// The byte channel failed, closed, or returned a short read/write.
    ///
    /// Unrecoverable: the caller must reconnect.
    ConnectionLost(ConnectionError),
    /// The authentication handshake failed or the method is unsupported.
    Auth(AuthError),
    /// The server answered with an ErrorResponse, or sent a malformed frame.
    ///
    /// After a server ErrorResponse the connection remains usable.
    Protocol(ProtocolError),
    /// The caller invoked functionality this client does not implement.
    NotSupported(NotSupportedError),
    /// Invalid configuration detected before any I/O took place.
    Config(ConfigError),
    /// A caller-supplied COPY source or sink failed.
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish the TCP connection
    Connect,
    /// Connection refused by the peer
    Refused,
    /// Connection lost during operation (EOF, reset, read/write deadline)
    Disconnected,
    /// Operation attempted on a connection that was already closed
    Closed,
    /// SSL/TLS negotiation failed
    Ssl,
}

#[derive(Debug)]
pub struct AuthError {
    pub message: String,
    /// SQLSTATE when the server rejected the credentials itself.
    pub sqlstate: Option<String>,
}

#[derive(Debug, Default)]
pub struct ProtocolError {
    pub severity: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub position: Option<usize>,
    /// Offending frame bytes for malformed-message errors.
    pub raw_data: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct NotSupportedError {
    pub feature: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a `ConnectionLost` error of the given kind.
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::ConnectionLost(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Build an `Auth` error with no server SQLSTATE.
    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth(AuthError {
            message: message.into(),
            sqlstate: None,
        })
    }

    /// Build a `Protocol` error for a malformed or unexpected frame.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            ..Default::default()
        })
    }

    /// Build a `NotSupported` error naming the missing feature.
    pub fn not_supported(feature: impl Into<String>) -> Self {
        Error::NotSupported(NotSupportedError {
            feature: feature.into(),
        })
    }

    /// Build a `Config` error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Is this a channel-level failure that requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::ConnectionLost(_) | Error::Auth(_))
    }

    /// Did the server report this error (as opposed to a local failure)?
    pub fn is_server_error(&self) -> bool {
        match self {
            Error::Protocol(p) => p.sqlstate.is_some(),
            Error::Auth(a) => a.sqlstate.is_some(),
            _ => false,
        }
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Protocol(p) => p.sqlstate.as_deref(),
            Error::Auth(a) => a.sqlstate.as_deref(),
            _ => None,
        }
    }
}

impl ProtocolError {
    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this an "in failed transaction" rejection (25P02)?
    pub fn is_in_failed_transaction(&self) -> bool {
        self.sqlstate.as_deref() == Some("25P02")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionLost(e) => write!(f, "Connection lost: {}", e.message),
            Error::Auth(e) => write!(f, "Authentication error: {}", e.message),
            Error::Protocol(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Protocol error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Protocol error: {}", e.message)
                }
            }
            Error::NotSupported(e) => write!(f, "Not supported: {}", e.feature),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConnectionLost(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for NotSupportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.feature)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::ConnectionLost(err)
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Auth(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<NotSupportedError> for Error {
    fn from(err: NotSupportedError) -> Self {
        Error::NotSupported(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for micropg operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_helpers() {
        let protocol = ProtocolError {
            severity: Some("ERROR".to_string()),
            sqlstate: Some("23505".to_string()),
            message: "unique violation".to_string(),
            ..Default::default()
        };
        assert!(protocol.is_unique_violation());
        assert!(!protocol.is_in_failed_transaction());

        let err = Error::Protocol(protocol);
        assert_eq!(err.sqlstate(), Some("23505"));
        assert!(err.is_server_error());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn local_protocol_error_has_no_sqlstate() {
        let err = Error::protocol("truncated DataRow");
        assert_eq!(err.sqlstate(), None);
        assert!(!err.is_server_error());
        assert_eq!(err.to_string(), "Protocol error: truncated DataRow");
    }

    #[test]
    fn connection_flags() {
        let lost = Error::connection(ConnectionErrorKind::Disconnected, "eof");
        assert!(lost.is_connection_error());
        assert_eq!(lost.to_string(), "Connection lost: eof");

        let auth = Error::auth("nonce mismatch");
        assert!(auth.is_connection_error());

        let unsupported = Error::not_supported("binary results");
        assert!(!unsupported.is_connection_error());
        assert_eq!(unsupported.to_string(), "Not supported: binary results");
    }

    #[test]
    fn display_includes_sqlstate() {
        let err = Error::Protocol(ProtocolError {
            sqlstate: Some("42601".to_string()),
            message: "syntax error at or near \"SELEC\"".to_string(),
            ..Default::default()
        });
        assert_eq!(
            err.to_string(),
            "Protocol error (SQLSTATE 42601): syntax error at or near \"SELEC\""
        );
    }
}
