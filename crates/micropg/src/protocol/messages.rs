//! Frontend and backend message definitions.

use micropg_core::ColumnDescription;
use micropg_core::error::ProtocolError;

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// Startup packet (untagged): protocol version plus key/value parameters.
    Startup {
        version: i32,
        params: Vec<(String, String)>,
    },
    /// SSLRequest probe (untagged).
    SslRequest,
    /// Cleartext or MD5-hashed password.
    PasswordMessage(String),
    /// First SASL message: mechanism name plus client-first data.
    SaslInitialResponse { mechanism: String, data: Vec<u8> },
    /// Subsequent SASL message (client-final).
    SaslResponse(Vec<u8>),
    /// Simple query. The text is already encoded in the session encoding.
    Query(Vec<u8>),
    /// One chunk of COPY IN data.
    CopyData(Vec<u8>),
    /// End of COPY IN data.
    CopyDone,
    /// Abort COPY IN with a reason.
    CopyFail(String),
    /// Ask the server to flush its output buffer.
    Flush,
    /// Orderly session end; no response follows.
    Terminate,
}

/// Authentication request carried by a backend `R` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationRequest {
    /// Authentication succeeded (code 0).
    Ok,
    /// Send the password in clear text (code 3).
    CleartextPassword,
    /// Send an MD5-hashed password using this salt (code 5).
    Md5Password([u8; 4]),
    /// Start SASL with one of these mechanisms (code 10).
    Sasl(Vec<String>),
    /// SASL server-first message (code 11).
    SaslContinue(Vec<u8>),
    /// SASL server-final message (code 12).
    SaslFinal(Vec<u8>),
    /// Any method this client does not implement.
    Unsupported(i32),
}

/// Transaction status reported by ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not in a transaction block ('I')
    Idle,
    /// In a transaction block ('T')
    InTransaction,
    /// In a failed transaction block ('E')
    Error,
}

impl TransactionStatus {
    /// Parse the single status byte of a ReadyForQuery message.
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Error),
            _ => None,
        }
    }

    /// The wire byte for this status.
    pub const fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Error => b'E',
        }
    }
}

/// Fields of an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity ('S'): ERROR, FATAL, PANIC, WARNING, NOTICE, ...
    pub severity: String,
    /// SQLSTATE code ('C')
    pub code: String,
    /// Primary message ('M')
    pub message: String,
    /// Detail ('D')
    pub detail: Option<String>,
    /// Hint ('H')
    pub hint: Option<String>,
    /// Cursor position into the query text, 1-based ('P')
    pub position: Option<u32>,
}

impl ErrorFields {
    /// Store one `(field type, value)` pair; unknown field types are skipped.
    pub fn set(&mut self, field: u8, value: String) {
        match field {
            // 'V' is the non-localized severity (9.6+).
            b'S' | b'V' => self.severity = value,
            b'C' => self.code = value,
            b'M' => self.message = value,
            b'D' => self.detail = Some(value),
            b'H' => self.hint = Some(value),
            b'P' => self.position = value.parse().ok(),
            _ => {}
        }
    }
}

impl From<ErrorFields> for ProtocolError {
    fn from(fields: ErrorFields) -> Self {
        ProtocolError {
            severity: Some(fields.severity).filter(|s| !s.is_empty()),
            sqlstate: Some(fields.code),
            message: fields.message,
            detail: fields.detail,
            hint: fields.hint,
            position: fields.position.map(|p| p as usize),
            raw_data: None,
        }
    }
}

/// Messages received from the server, decoded once at the framing boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Authentication challenge or outcome.
    Authentication(AuthenticationRequest),
    /// Cancellation key for this backend.
    BackendKeyData { process_id: i32, secret_key: i32 },
    /// Server runtime parameter.
    ParameterStatus { name: String, value: String },
    /// Column metadata for the rows that follow.
    RowDescription(Vec<ColumnDescription>),
    /// One result row; `None` is SQL NULL.
    DataRow(Vec<Option<Vec<u8>>>),
    /// End of one statement, with its command tag (e.g. `INSERT 0 1`).
    CommandComplete(String),
    /// The query string was empty.
    EmptyQueryResponse,
    /// The statement failed.
    ErrorResponse(ErrorFields),
    /// Informational message.
    NoticeResponse(ErrorFields),
    /// Server is ready to receive COPY data.
    CopyInResponse { format: u8, column_formats: Vec<i16> },
    /// Server is about to send COPY data.
    CopyOutResponse { format: u8, column_formats: Vec<i16> },
    /// Server entered bidirectional COPY (streaming replication).
    CopyBothResponse { format: u8, column_formats: Vec<i16> },
    /// One chunk of COPY OUT data.
    CopyData(Vec<u8>),
    /// End of COPY OUT data.
    CopyDone,
    /// End of a request/response round.
    ReadyForQuery(TransactionStatus),
    /// Any tag this client does not interpret.
    Unknown { tag: u8 },
}

impl BackendMessage {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BackendMessage::Authentication(_) => "Authentication",
            BackendMessage::BackendKeyData { .. } => "BackendKeyData",
            BackendMessage::ParameterStatus { .. } => "ParameterStatus",
            BackendMessage::RowDescription(_) => "RowDescription",
            BackendMessage::DataRow(_) => "DataRow",
            BackendMessage::CommandComplete(_) => "CommandComplete",
            BackendMessage::EmptyQueryResponse => "EmptyQueryResponse",
            BackendMessage::ErrorResponse(_) => "ErrorResponse",
            BackendMessage::NoticeResponse(_) => "NoticeResponse",
            BackendMessage::CopyInResponse { .. } => "CopyInResponse",
            BackendMessage::CopyOutResponse { .. } => "CopyOutResponse",
            BackendMessage::CopyBothResponse { .. } => "CopyBothResponse",
            BackendMessage::CopyData(_) => "CopyData",
            BackendMessage::CopyDone => "CopyDone",
            BackendMessage::ReadyForQuery(_) => "ReadyForQuery",
            BackendMessage::Unknown { .. } => "Unknown",
        }
    }
}
