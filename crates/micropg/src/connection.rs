//! PostgreSQL connection implementation.
//!
//! This module implements the PostgreSQL wire protocol connection,
//! including connection establishment, authentication, and the message
//! dispatch loop every request/response round runs through.
//!
//! ```rust,ignore
//! use micropg::{Connection, PgConfig, Value};
//!
//! let config = PgConfig::new("localhost", "postgres")
//!     .password("secret")
//!     .database("mydb");
//! let mut conn = Connection::connect(config)?;
//! let mut cur = conn.cursor();
//! cur.execute("SELECT id, name FROM users WHERE id = %s", &[Value::Int(1)])?;
//! let rows = cur.fetch_all();
//! ```

use std::collections::HashMap;
use std::io::{Read, Write};

use micropg_core::error::{AuthError, ConnectionError, ConnectionErrorKind, ProtocolError};
use micropg_core::{Error, Result};

use crate::auth::{ScramClient, md5_password, scram};
use crate::channel::{self, PgStream};
use crate::config::PgConfig;
use crate::copy::CopyIo;
use crate::cursor::{Cursor, ResultSet};
use crate::protocol::{
    AuthenticationRequest, BackendMessage, ErrorFields, FrontendMessage, MessageWriter,
    PROTOCOL_VERSION, TransactionStatus, decode_backend_message, read_frame,
};
use crate::types::TextEncoding;

/// Transaction state as last reported by ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyState {
    /// Not in a transaction block ('I')
    Idle,
    /// In a transaction block ('T')
    InTransaction,
    /// In a failed transaction block ('E')
    Error,
    /// No ReadyForQuery seen yet
    #[default]
    Unknown,
}

impl From<TransactionStatus> for ReadyState {
    fn from(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Idle => ReadyState::Idle,
            TransactionStatus::InTransaction => ReadyState::InTransaction,
            TransactionStatus::Error => ReadyState::Error,
        }
    }
}

/// Where the dispatch loop is in a request/response round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchState {
    /// Startup sent; expecting authentication requests
    AwaitingAuth,
    /// Expecting results, parameters or ReadyForQuery
    AwaitingRows,
    /// ReadyForQuery seen
    Done,
}

/// A connection to a PostgreSQL server over any blocking byte channel.
pub struct Connection<S: Read + Write = PgStream> {
    /// `None` once closed
    stream: Option<S>,
    config: PgConfig,
    encoding: TextEncoding,
    ready_state: ReadyState,
    autocommit: bool,
    /// Backend process ID (for query cancellation)
    process_id: i32,
    /// Backend secret key (for query cancellation)
    secret_key: i32,
    /// Server parameters reported via ParameterStatus
    parameters: HashMap<String, String>,
    writer: MessageWriter,
}

impl<S: Read + Write> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("ready_state", &self.ready_state)
            .field("autocommit", &self.autocommit)
            .field("encoding", &self.encoding)
            .field("closed", &self.stream.is_none())
            .finish_non_exhaustive()
    }
}

impl Connection<PgStream> {
    /// Establish a new connection to the PostgreSQL server.
    ///
    /// This performs the complete connection handshake:
    /// 1. TCP connection
    /// 2. SSL negotiation (if configured)
    /// 3. Startup message
    /// 4. Authentication
    /// 5. Receive server parameters and ReadyForQuery
    #[allow(clippy::result_large_err)]
    pub fn connect(config: PgConfig) -> Result<Self> {
        tracing::debug!(
            host = %config.host,
            port = config.port,
            user = %config.user,
            ssl_mode = ?config.ssl_mode,
            "connecting"
        );

        let mut stream = PgStream::connect(&config)?;
        if config.ssl_mode.should_try_ssl() {
            stream = negotiate_ssl(stream, &config)?;
        }

        Self::from_stream(stream, config)
    }
}

impl<S: Read + Write> Connection<S> {
    /// Run startup and authentication over an already-open channel.
    #[allow(clippy::result_large_err)]
    pub fn from_stream(stream: S, config: PgConfig) -> Result<Self> {
        let mut conn = Self {
            stream: Some(stream),
            autocommit: config.autocommit,
            config,
            encoding: TextEncoding::default(),
            ready_state: ReadyState::Unknown,
            process_id: 0,
            secret_key: 0,
            parameters: HashMap::new(),
            writer: MessageWriter::new(),
        };

        let params = conn.config.startup_params();
        conn.send(&FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params,
        })?;
        conn.dispatch(DispatchState::AwaitingAuth, None, &mut CopyIo::none())?;

        tracing::debug!(
            process_id = conn.process_id,
            encoding = conn.encoding.name(),
            "connection ready"
        );
        Ok(conn)
    }

    /// Create a cursor on this connection.
    pub fn cursor(&mut self) -> Cursor<'_, S> {
        Cursor::new(self)
    }

    /// Run one statement outside the transaction controller and discard
    /// its results.
    ///
    /// For statements that cannot run inside a transaction block, such as
    /// `CREATE DATABASE`.
    #[allow(clippy::result_large_err)]
    pub fn simple_query(&mut self, sql: &str) -> Result<()> {
        self.round_trip(sql, None, CopyIo::none())
    }

    /// Send Terminate and release the channel.
    ///
    /// Closing twice is a no-op.
    #[allow(clippy::result_large_err)]
    pub fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        tracing::debug!("closing connection");
        let data = self.writer.write(&FrontendMessage::Terminate);
        channel::write_all(&mut stream, data)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Transaction state as last reported by the server.
    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn set_autocommit(&mut self, enabled: bool) {
        self.autocommit = enabled;
    }

    /// Negotiated server text encoding.
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Get the backend process ID (for query cancellation).
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// Get the secret key (for query cancellation).
    pub fn secret_key(&self) -> i32 {
        self.secret_key
    }

    /// Get a server parameter value.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Get all server parameters.
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    /// The configuration this connection was opened with.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// The underlying channel, unless closed.
    pub fn get_ref(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    // ==================== Request/Response ====================

    /// Send one query and run the dispatch loop until ReadyForQuery.
    #[allow(clippy::result_large_err)]
    pub(crate) fn round_trip(
        &mut self,
        sql: &str,
        result: Option<&mut ResultSet>,
        mut copy: CopyIo<'_>,
    ) -> Result<()> {
        self.send_query(sql)?;
        self.dispatch(DispatchState::AwaitingRows, result, &mut copy)
    }

    /// Send a Query message followed by Flush, in one write.
    #[allow(clippy::result_large_err)]
    fn send_query(&mut self, sql: &str) -> Result<()> {
        let text = self.encoding.encode(sql)?.into_owned();
        let stream = self.stream.as_mut().ok_or_else(closed_error)?;
        self.writer.write(&FrontendMessage::Query(text));
        let data = self.writer.append(&FrontendMessage::Flush);
        channel::write_all(stream, data)
    }

    /// Read messages and act on them until ReadyForQuery.
    ///
    /// A server ErrorResponse, or a message that fails to decode, is
    /// remembered and returned once the round is complete, so the channel
    /// stays in step with the server. During authentication, or for FATAL
    /// errors, it is returned immediately. A broken frame header closes the
    /// connection, since the next message boundary is unknown.
    #[allow(clippy::result_large_err)]
    pub(crate) fn dispatch(
        &mut self,
        initial: DispatchState,
        mut result: Option<&mut ResultSet>,
        copy: &mut CopyIo<'_>,
    ) -> Result<()> {
        let handshake = initial == DispatchState::AwaitingAuth;
        let mut state = initial;
        let mut scram: Option<ScramClient> = None;
        let mut pending: Option<Error> = None;

        while state != DispatchState::Done {
            let msg = match self.receive()? {
                Ok(msg) => msg,
                Err(e) if handshake => return Err(e),
                Err(e) => {
                    pending.get_or_insert(e);
                    continue;
                }
            };

            if state == DispatchState::AwaitingAuth
                && !matches!(
                    msg,
                    BackendMessage::Authentication(_)
                        | BackendMessage::ErrorResponse(_)
                        | BackendMessage::NoticeResponse(_)
                )
            {
                return Err(Error::auth(format!(
                    "unexpected {} during authentication",
                    msg.name()
                )));
            }

            match msg {
                BackendMessage::Authentication(request) => {
                    if state != DispatchState::AwaitingAuth {
                        return Err(Error::protocol("unexpected authentication request"));
                    }
                    if self.authenticate(request, &mut scram)? {
                        state = DispatchState::AwaitingRows;
                    }
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.set_parameter(name, value);
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = process_id;
                    self.secret_key = secret_key;
                }
                BackendMessage::RowDescription(columns) => {
                    if let Some(result) = result.as_deref_mut() {
                        result.set_columns(columns);
                    }
                }
                BackendMessage::DataRow(values) => {
                    if let Some(result) = result.as_deref_mut() {
                        if let Err(e) = result.push_row(values, self.encoding) {
                            pending.get_or_insert(e);
                        }
                    }
                }
                BackendMessage::CommandComplete(tag) => {
                    tracing::trace!(tag = %tag, "command complete");
                    if let Some(result) = result.as_deref_mut() {
                        result.command_complete(&tag);
                    }
                }
                BackendMessage::EmptyQueryResponse => {}
                BackendMessage::ErrorResponse(fields) => {
                    let fatal = matches!(fields.severity.as_str(), "FATAL" | "PANIC");
                    if handshake || fatal {
                        return Err(handshake_error(fields, handshake));
                    }
                    tracing::debug!(sqlstate = %fields.code, error = %fields.message, "server error");
                    pending.get_or_insert(Error::Protocol(fields.into()));
                }
                BackendMessage::NoticeResponse(fields) => {
                    tracing::warn!(
                        severity = %fields.severity,
                        sqlstate = %fields.code,
                        "server notice: {}",
                        fields.message
                    );
                }
                BackendMessage::CopyInResponse { .. } => {
                    if let Some(e) = self.copy_in(copy)? {
                        pending.get_or_insert(Error::Io(e));
                    }
                }
                BackendMessage::CopyOutResponse { .. } => {
                    tracing::debug!("COPY OUT started");
                }
                BackendMessage::CopyBothResponse { .. } => {
                    // The server now waits for client data indefinitely.
                    tracing::warn!("server started COPY BOTH, closing connection");
                    self.stream = None;
                    return Err(Error::not_supported("COPY BOTH (replication) mode"));
                }
                BackendMessage::CopyData(data) => copy.write_out(&data),
                BackendMessage::CopyDone => copy.finish_out(),
                BackendMessage::ReadyForQuery(status) => {
                    self.ready_state = status.into();
                    state = DispatchState::Done;
                }
                BackendMessage::Unknown { tag } => {
                    tracing::trace!(tag = %char::from(tag), "ignoring unknown message");
                }
            }
        }

        if let Some(e) = copy.take_error() {
            pending.get_or_insert(Error::Io(e));
        }

        match pending {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Answer one authentication request; `true` once authentication is done.
    #[allow(clippy::result_large_err)]
    fn authenticate(
        &mut self,
        request: AuthenticationRequest,
        scram: &mut Option<ScramClient>,
    ) -> Result<bool> {
        match request {
            AuthenticationRequest::Ok => {
                if scram.is_some() {
                    return Err(Error::auth(
                        "server finished SCRAM authentication without a signature",
                    ));
                }
                tracing::debug!("authenticated");
                return Ok(true);
            }
            AuthenticationRequest::CleartextPassword => {
                let password = self.require_password("cleartext")?.to_string();
                self.send(&FrontendMessage::PasswordMessage(password))?;
            }
            AuthenticationRequest::Md5Password(salt) => {
                let hash = md5_password(&self.config.user, self.require_password("MD5")?, salt);
                self.send(&FrontendMessage::PasswordMessage(hash))?;
            }
            AuthenticationRequest::Sasl(mechanisms) => {
                if !mechanisms.iter().any(|m| m == scram::MECHANISM) {
                    return Err(Error::auth(format!(
                        "unsupported SASL mechanisms: {:?}",
                        mechanisms
                    )));
                }
                let client = ScramClient::new("", self.require_password("SCRAM-SHA-256")?);
                self.send(&FrontendMessage::SaslInitialResponse {
                    mechanism: scram::MECHANISM.to_string(),
                    data: client.client_first(),
                })?;
                *scram = Some(client);
            }
            AuthenticationRequest::SaslContinue(data) => {
                let client = scram
                    .as_mut()
                    .ok_or_else(|| Error::auth("SASL continue without SASL start"))?;
                let client_final = client.process_server_first(&data)?;
                self.send(&FrontendMessage::SaslResponse(client_final))?;
            }
            AuthenticationRequest::SaslFinal(data) => {
                let client = scram
                    .take()
                    .ok_or_else(|| Error::auth("SASL final without SASL start"))?;
                client.verify_server_final(&data)?;
            }
            AuthenticationRequest::Unsupported(code) => {
                return Err(Error::auth(format!(
                    "authentication method {} not supported",
                    code
                )));
            }
        }
        Ok(false)
    }

    #[allow(clippy::result_large_err)]
    fn require_password(&self, method: &str) -> Result<&str> {
        self.config
            .password
            .as_deref()
            .ok_or_else(|| Error::auth(format!("{} authentication requires a password", method)))
    }

    fn set_parameter(&mut self, name: String, value: String) {
        if name == "server_encoding" {
            self.encoding = TextEncoding::from_name(&value).unwrap_or_else(|| {
                tracing::warn!(encoding = %value, "unsupported server encoding, assuming UTF8");
                TextEncoding::Utf8
            });
        }
        self.parameters.insert(name, value);
    }

    // ==================== Low-Level I/O ====================

    #[allow(clippy::result_large_err)]
    pub(crate) fn send(&mut self, msg: &FrontendMessage) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(closed_error)?;
        let data = self.writer.write(msg);
        channel::write_all(stream, data)
    }

    /// Read and decode the next message.
    ///
    /// Channel and framing failures are returned through the outer `Result`;
    /// the inner one carries a decode error for a message that was read in
    /// full.
    #[allow(clippy::result_large_err)]
    fn receive(&mut self) -> Result<Result<BackendMessage>> {
        let stream = self.stream.as_mut().ok_or_else(closed_error)?;
        let (tag, payload) = match read_frame(stream) {
            Ok(frame) => frame,
            Err(e @ Error::Protocol(_)) => {
                tracing::warn!(error = %e, "malformed frame header, closing connection");
                self.stream = None;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        Ok(decode_backend_message(tag, &payload, self.encoding))
    }
}

impl<S: Read + Write> Drop for Connection<S> {
    fn drop(&mut self) {
        // Try to close gracefully, ignore errors
        let _ = self.close();
    }
}

// ==================== Helper Functions ====================

#[allow(clippy::result_large_err)]
fn negotiate_ssl(stream: PgStream, config: &PgConfig) -> Result<PgStream> {
    #[cfg(not(feature = "tls"))]
    {
        if config.ssl_mode.is_required() {
            return Err(Error::config(
                "TLS requested but 'micropg' was built without feature 'tls'",
            ));
        }
        tracing::debug!("TLS preferred but not compiled in, continuing in plain text");
        Ok(stream)
    }

    #[cfg(feature = "tls")]
    {
        let mut stream = stream;
        let data = MessageWriter::with_capacity(8)
            .write(&FrontendMessage::SslRequest)
            .to_vec();
        channel::write_all(&mut stream, &data)?;

        let mut answer = [0u8; 1];
        channel::read_full(&mut stream, &mut answer)?;

        match (answer[0], stream) {
            (b'S', PgStream::Plain(socket)) => {
                let tls = crate::tls::upgrade(socket, &config.host, config.ssl_mode)?;
                Ok(PgStream::Tls(Box::new(tls)))
            }
            (b'N', stream) => {
                if config.ssl_mode.is_required() {
                    return Err(Error::connection(
                        ConnectionErrorKind::Ssl,
                        "Server does not support SSL",
                    ));
                }
                tracing::debug!("server declined TLS, continuing in plain text");
                Ok(stream)
            }
            (other, _) => Err(Error::connection(
                ConnectionErrorKind::Ssl,
                format!("Unexpected SSL response: 0x{:02x}", other),
            )),
        }
    }
}

fn closed_error() -> Error {
    Error::connection(ConnectionErrorKind::Closed, "connection is closed")
}

/// Map an error the server reported before or instead of ReadyForQuery.
fn handshake_error(fields: ErrorFields, handshake: bool) -> Error {
    if handshake {
        match fields.code.get(..2) {
            Some("28") => {
                return Error::Auth(AuthError {
                    message: fields.message,
                    sqlstate: Some(fields.code),
                });
            }
            Some("08") => {
                return Error::ConnectionLost(ConnectionError {
                    kind: ConnectionErrorKind::Connect,
                    message: fields.message,
                    source: None,
                });
            }
            _ => {}
        }
    }
    Error::Protocol(ProtocolError::from(fields))
}
