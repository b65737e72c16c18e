//! PostgreSQL message decoder.
//!
//! A backend message is read from the channel in one piece (tag, length,
//! payload) and decoded into a [`BackendMessage`] before anything else looks
//! at it, so the dispatch loop only ever matches on message kinds.

#![allow(clippy::cast_sign_loss)]

use std::io::Read;

use micropg_core::{ColumnDescription, Error, Result};

use super::messages::{AuthenticationRequest, BackendMessage, ErrorFields, TransactionStatus};
use super::{MAX_MESSAGE_LEN, NULL_LENGTH, auth_code, backend_type};
use crate::channel::read_full;
use crate::types::{TextEncoding, oid};

/// Cursor over a single message payload.
///
/// All multi-byte integers are read in big-endian (network) byte order.
#[derive(Debug)]
pub struct MessageReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).ok_or_else(truncated)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let bytes = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(truncated());
        }
        let data = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(data)
    }

    /// Read a null-terminated string, returning its bytes without the NUL.
    pub fn read_cstring(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::protocol("unterminated string in server message"))?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    /// Consume everything left in the payload.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}

fn truncated() -> Error {
    Error::protocol("unexpected end of server message")
}

/// Read one complete message from the channel and decode it.
///
/// Blocks until the tag, the length and the whole payload have arrived.
#[allow(clippy::result_large_err)]
pub fn read_message<S: Read>(stream: &mut S, encoding: TextEncoding) -> Result<BackendMessage> {
    let (tag, payload) = read_frame(stream)?;
    decode_backend_message(tag, &payload, encoding)
}

/// Read one message's tag and payload without decoding it.
///
/// An error here leaves the channel at an unknown position in the message
/// stream. A decode error on the returned payload does not.
#[allow(clippy::result_large_err)]
pub fn read_frame<S: Read>(stream: &mut S) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 5];
    read_full(stream, &mut header)?;

    let tag = header[0];
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len < 4 {
        return Err(Error::protocol(format!(
            "invalid length {} for message '{}'",
            len,
            char::from(tag)
        )));
    }
    let body_len = len as usize - 4;
    if body_len > MAX_MESSAGE_LEN {
        return Err(Error::protocol(format!(
            "message '{}' of {} bytes exceeds the {} byte limit",
            char::from(tag),
            body_len,
            MAX_MESSAGE_LEN
        )));
    }

    let mut payload = vec![0u8; body_len];
    read_full(stream, &mut payload)?;

    tracing::trace!(tag = %char::from(tag), len = body_len, "received message");
    Ok((tag, payload))
}

/// Decode a message payload according to its tag.
#[allow(clippy::result_large_err)]
pub fn decode_backend_message(
    tag: u8,
    payload: &[u8],
    encoding: TextEncoding,
) -> Result<BackendMessage> {
    let mut r = MessageReader::new(payload);

    let msg = match tag {
        backend_type::AUTHENTICATION => BackendMessage::Authentication(decode_auth(&mut r)?),
        backend_type::BACKEND_KEY_DATA => BackendMessage::BackendKeyData {
            process_id: r.read_i32()?,
            secret_key: r.read_i32()?,
        },
        backend_type::PARAMETER_STATUS => BackendMessage::ParameterStatus {
            name: encoding.decode_lossy(r.read_cstring()?),
            value: encoding.decode_lossy(r.read_cstring()?),
        },
        backend_type::ROW_DESCRIPTION => {
            BackendMessage::RowDescription(decode_row_description(&mut r, encoding)?)
        }
        backend_type::DATA_ROW => BackendMessage::DataRow(decode_data_row(&mut r)?),
        backend_type::COMMAND_COMPLETE => {
            BackendMessage::CommandComplete(encoding.decode_lossy(r.read_cstring()?))
        }
        backend_type::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
        backend_type::ERROR_RESPONSE => {
            BackendMessage::ErrorResponse(decode_error_fields(&mut r, encoding)?)
        }
        backend_type::NOTICE_RESPONSE => {
            BackendMessage::NoticeResponse(decode_error_fields(&mut r, encoding)?)
        }
        backend_type::COPY_IN_RESPONSE => {
            let (format, column_formats) = decode_copy_response(&mut r)?;
            BackendMessage::CopyInResponse {
                format,
                column_formats,
            }
        }
        backend_type::COPY_OUT_RESPONSE => {
            let (format, column_formats) = decode_copy_response(&mut r)?;
            BackendMessage::CopyOutResponse {
                format,
                column_formats,
            }
        }
        backend_type::COPY_BOTH_RESPONSE => {
            let (format, column_formats) = decode_copy_response(&mut r)?;
            BackendMessage::CopyBothResponse {
                format,
                column_formats,
            }
        }
        backend_type::COPY_DATA => BackendMessage::CopyData(r.read_rest().to_vec()),
        backend_type::COPY_DONE => BackendMessage::CopyDone,
        backend_type::READY_FOR_QUERY => {
            let status = r.read_byte()?;
            let status = TransactionStatus::from_byte(status).ok_or_else(|| {
                Error::protocol(format!(
                    "invalid transaction status 0x{:02x} in ReadyForQuery",
                    status
                ))
            })?;
            BackendMessage::ReadyForQuery(status)
        }
        other => BackendMessage::Unknown { tag: other },
    };

    Ok(msg)
}

fn decode_auth(r: &mut MessageReader<'_>) -> Result<AuthenticationRequest> {
    let code = r.read_i32()?;
    let req = match code {
        auth_code::OK => AuthenticationRequest::Ok,
        auth_code::CLEARTEXT_PASSWORD => AuthenticationRequest::CleartextPassword,
        auth_code::MD5_PASSWORD => {
            let salt = r.read_bytes(4)?;
            AuthenticationRequest::Md5Password([salt[0], salt[1], salt[2], salt[3]])
        }
        auth_code::SASL => {
            let mut mechanisms = Vec::new();
            loop {
                let name = r.read_cstring()?;
                if name.is_empty() {
                    break;
                }
                mechanisms.push(String::from_utf8_lossy(name).into_owned());
            }
            AuthenticationRequest::Sasl(mechanisms)
        }
        auth_code::SASL_CONTINUE => AuthenticationRequest::SaslContinue(r.read_rest().to_vec()),
        auth_code::SASL_FINAL => AuthenticationRequest::SaslFinal(r.read_rest().to_vec()),
        other => AuthenticationRequest::Unsupported(other),
    };
    Ok(req)
}

fn decode_row_description(
    r: &mut MessageReader<'_>,
    encoding: TextEncoding,
) -> Result<Vec<ColumnDescription>> {
    let count = r.read_i16()?;
    let mut columns = Vec::with_capacity(count.max(0) as usize);

    for _ in 0..count {
        let name = encoding.decode_lossy(r.read_cstring()?);
        // Table OID and column attribute number.
        r.read_bytes(6)?;
        let type_oid = r.read_i32()? as u32;
        let type_len = r.read_i16()?;
        let type_modifier = r.read_i32()?;
        // Format code; results are always text.
        r.read_i16()?;

        let mut column = ColumnDescription::new(name, type_oid);
        match type_oid {
            oid::VARCHAR => {
                column.size = if type_modifier >= 4 {
                    type_modifier - 4
                } else {
                    -1
                };
            }
            oid::NUMERIC => {
                column.size = i32::from(type_len);
                if type_modifier >= 4 {
                    let modifier = type_modifier - 4;
                    column.precision = (modifier >> 16) & 0xFFFF;
                    column.scale = modifier & 0xFFFF;
                }
            }
            _ => column.size = i32::from(type_len),
        }
        columns.push(column);
    }

    Ok(columns)
}

fn decode_data_row(r: &mut MessageReader<'_>) -> Result<Vec<Option<Vec<u8>>>> {
    let count = r.read_i16()?;
    let mut values = Vec::with_capacity(count.max(0) as usize);

    for _ in 0..count {
        let len = r.read_i32()?;
        if len == NULL_LENGTH {
            values.push(None);
        } else if len < 0 {
            return Err(Error::protocol(format!("invalid column length {} in DataRow", len)));
        } else {
            values.push(Some(r.read_bytes(len as usize)?.to_vec()));
        }
    }

    Ok(values)
}

fn decode_error_fields(r: &mut MessageReader<'_>, encoding: TextEncoding) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    loop {
        let field = r.read_byte()?;
        if field == 0 {
            break;
        }
        let value = encoding.decode_lossy(r.read_cstring()?);
        fields.set(field, value);
    }
    Ok(fields)
}

fn decode_copy_response(r: &mut MessageReader<'_>) -> Result<(u8, Vec<i16>)> {
    let format = r.read_byte()?;
    let count = r.read_i16()?;
    let column_formats = (0..count)
        .map(|_| r.read_i16())
        .collect::<Result<Vec<_>>>()?;
    Ok((format, column_formats))
}
