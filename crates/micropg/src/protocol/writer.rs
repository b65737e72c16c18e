//! PostgreSQL message encoder.
//!
//! This module handles encoding frontend messages into the wire protocol format.

#![allow(clippy::cast_possible_truncation)]

use super::messages::FrontendMessage;
use super::{SSL_REQUEST_CODE, frontend_type};

/// Buffer for writing PostgreSQL protocol messages.
///
/// All multi-byte integers are written in big-endian (network) byte order.
#[derive(Debug, Clone)]
pub struct MessageWriter {
    /// Internal buffer for message data
    buf: Vec<u8>,
}

impl Default for MessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageWriter {
    /// Create a new message writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new message writer with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Clear the internal buffer.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Get the current buffer contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encode a frontend message into the (cleared) buffer.
    ///
    /// Returns a slice to the encoded message data.
    pub fn write(&mut self, msg: &FrontendMessage) -> &[u8] {
        self.buf.clear();
        self.append(msg)
    }

    /// Encode a frontend message after whatever the buffer already holds.
    ///
    /// Used to batch messages that must leave in a single write, such as a
    /// query followed by its Flush.
    pub fn append(&mut self, msg: &FrontendMessage) -> &[u8] {
        match msg {
            FrontendMessage::Startup { version, params } => {
                self.write_startup(*version, params);
            }
            FrontendMessage::SslRequest => {
                self.write_ssl_request();
            }
            FrontendMessage::PasswordMessage(password) => {
                self.write_cstring_message(frontend_type::PASSWORD, password.as_bytes());
            }
            FrontendMessage::SaslInitialResponse { mechanism, data } => {
                self.write_sasl_initial(mechanism, data);
            }
            FrontendMessage::SaslResponse(data) => {
                self.write_raw_message(frontend_type::PASSWORD, data);
            }
            FrontendMessage::Query(query) => {
                self.write_cstring_message(frontend_type::QUERY, query);
            }
            FrontendMessage::CopyData(data) => {
                self.write_raw_message(frontend_type::COPY_DATA, data);
            }
            FrontendMessage::CopyDone => {
                self.write_empty_message(frontend_type::COPY_DONE);
            }
            FrontendMessage::CopyFail(reason) => {
                self.write_cstring_message(frontend_type::COPY_FAIL, reason.as_bytes());
            }
            FrontendMessage::Flush => {
                self.write_empty_message(frontend_type::FLUSH);
            }
            FrontendMessage::Terminate => {
                self.write_empty_message(frontend_type::TERMINATE);
            }
        }

        &self.buf
    }

    // ==================== Message Encoders ====================

    /// Write a startup message (no type byte).
    fn write_startup(&mut self, version: i32, params: &[(String, String)]) {
        let mut body_len = 4; // version
        for (key, value) in params {
            body_len += key.len() + 1 + value.len() + 1;
        }
        body_len += 1; // terminating null

        let total_len = (body_len + 4) as i32;
        self.buf.extend_from_slice(&total_len.to_be_bytes());
        self.buf.extend_from_slice(&version.to_be_bytes());

        for (key, value) in params {
            self.buf.extend_from_slice(key.as_bytes());
            self.buf.push(0);
            self.buf.extend_from_slice(value.as_bytes());
            self.buf.push(0);
        }

        self.buf.push(0);
    }

    /// Write SASL initial response.
    fn write_sasl_initial(&mut self, mechanism: &str, data: &[u8]) {
        self.buf.push(frontend_type::PASSWORD);

        // 4 (length) + mechanism + null + 4 (data length) + data
        let body_len = mechanism.len() + 1 + 4 + data.len();
        let total_len = (body_len + 4) as i32;
        self.buf.extend_from_slice(&total_len.to_be_bytes());

        self.buf.extend_from_slice(mechanism.as_bytes());
        self.buf.push(0);

        let data_len = data.len() as i32;
        self.buf.extend_from_slice(&data_len.to_be_bytes());
        self.buf.extend_from_slice(data);
    }

    /// Write SSL request (special format, no type byte).
    fn write_ssl_request(&mut self) {
        self.buf.extend_from_slice(&8_i32.to_be_bytes());
        self.buf.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    }

    // ==================== Helper Methods ====================

    /// Write a message with just a type byte and length (no body).
    fn write_empty_message(&mut self, type_byte: u8) {
        self.buf.push(type_byte);
        self.buf.extend_from_slice(&4_i32.to_be_bytes());
    }

    /// Write a message whose body is `data` verbatim.
    fn write_raw_message(&mut self, type_byte: u8, data: &[u8]) {
        self.buf.push(type_byte);
        let len = (data.len() + 4) as i32;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(data);
    }

    /// Write a message containing a single null-terminated string.
    fn write_cstring_message(&mut self, type_byte: u8, s: &[u8]) {
        self.buf.push(type_byte);
        let len = (s.len() + 5) as i32; // 4 for length + string + null
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(s);
        self.buf.push(0);
    }
}
