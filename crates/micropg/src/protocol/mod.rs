//! PostgreSQL frontend/backend protocol v3.0.
//!
//! Every message after startup is framed as:
//!
//! ```text
//! tag: u8 | length: i32 (big-endian, includes itself) | payload
//! ```
//!
//! The startup, SSL-request and cancel packets carry no tag byte.

pub mod messages;
pub mod reader;
pub mod writer;

pub use messages::{
    AuthenticationRequest, BackendMessage, ErrorFields, FrontendMessage, TransactionStatus,
};
pub use reader::{MessageReader, decode_backend_message, read_frame, read_message};
pub use writer::MessageWriter;

/// Protocol version 3.0 (major 3 in the high 16 bits, minor 0 in the low).
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

/// Magic "protocol version" identifying an SSLRequest packet.
pub const SSL_REQUEST_CODE: i32 = 80_877_103;

/// Length prefix value marking a NULL column in a DataRow.
pub const NULL_LENGTH: i32 = -1;

/// Upper bound on a single backend message payload.
///
/// Protects a memory-constrained client from allocating whatever a corrupt
/// length prefix claims.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// Tag bytes of frontend (client → server) messages.
pub mod frontend_type {
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const FLUSH: u8 = b'H';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const COPY_FAIL: u8 = b'f';
    pub const TERMINATE: u8 = b'X';
}

/// Tag bytes of backend (server → client) messages.
pub mod backend_type {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const COPY_IN_RESPONSE: u8 = b'G';
    pub const COPY_OUT_RESPONSE: u8 = b'H';
    pub const COPY_BOTH_RESPONSE: u8 = b'W';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const READY_FOR_QUERY: u8 = b'Z';
}

/// Authentication method codes carried by the `R` message.
pub mod auth_code {
    pub const OK: i32 = 0;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}
