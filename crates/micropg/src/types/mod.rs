//! Text-format type handling.
//!
//! This module provides:
//! - OID constants for the PostgreSQL types the decoder distinguishes
//! - `TextEncoding`, the negotiated server text encoding
//! - Decoding of text-format column values to `Value`
//! - Escaping of `Value` parameters into SQL literals

pub mod decode;
pub mod escape;
pub mod oid;

use std::borrow::Cow;

use micropg_core::{Error, Result};

pub use decode::decode_value;
pub use escape::{escape_parameter, format_query};

/// Server text encoding, as negotiated through the `server_encoding`
/// ParameterStatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// UTF-8 (the default)
    #[default]
    Utf8,
    /// SQL_ASCII: bytes above 0x7F carry no declared meaning
    SqlAscii,
    /// ISO-8859-1: each byte is the code point of the same value
    Latin1,
}

impl TextEncoding {
    /// Parse a PostgreSQL encoding name; `None` for encodings not handled.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().replace('-', "_").as_str() {
            "UTF8" | "UTF_8" | "UNICODE" => Some(TextEncoding::Utf8),
            "SQL_ASCII" => Some(TextEncoding::SqlAscii),
            "LATIN1" | "ISO_8859_1" | "ISO88591" => Some(TextEncoding::Latin1),
            _ => None,
        }
    }

    /// The PostgreSQL name of this encoding.
    pub const fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF8",
            TextEncoding::SqlAscii => "SQL_ASCII",
            TextEncoding::Latin1 => "LATIN1",
        }
    }

    /// Decode server bytes to text, failing on invalid input.
    pub fn decode<'a>(self, data: &'a [u8]) -> Result<Cow<'a, str>> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(data).map(Cow::Borrowed).map_err(|e| {
                Error::protocol(format!("invalid UTF-8 in server text: {}", e))
            }),
            TextEncoding::SqlAscii => Ok(String::from_utf8_lossy(data)),
            TextEncoding::Latin1 => Ok(Cow::Owned(data.iter().map(|&b| char::from(b)).collect())),
        }
    }

    /// Decode server bytes to text, replacing anything undecodable.
    pub fn decode_lossy(self, data: &[u8]) -> String {
        match self {
            TextEncoding::Latin1 => data.iter().map(|&b| char::from(b)).collect(),
            TextEncoding::Utf8 | TextEncoding::SqlAscii => {
                String::from_utf8_lossy(data).into_owned()
            }
        }
    }

    /// Encode client text for the server.
    pub fn encode<'a>(self, text: &'a str) -> Result<Cow<'a, [u8]>> {
        match self {
            TextEncoding::Utf8 | TextEncoding::SqlAscii => Ok(Cow::Borrowed(text.as_bytes())),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        Error::protocol(format!("character {:?} is not representable in LATIN1", c))
                    })
                })
                .collect::<Result<Vec<u8>>>()
                .map(Cow::Owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_names() {
        assert_eq!(TextEncoding::from_name("UTF8"), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::from_name("sql_ascii"), Some(TextEncoding::SqlAscii));
        assert_eq!(TextEncoding::from_name("ISO-8859-1"), Some(TextEncoding::Latin1));
        assert_eq!(TextEncoding::from_name("EUC_JP"), None);
    }

    #[test]
    fn test_latin1_roundtrip() {
        let bytes = TextEncoding::Latin1.encode("café").unwrap();
        assert_eq!(bytes.as_ref(), b"caf\xe9");
        assert_eq!(TextEncoding::Latin1.decode(&bytes).unwrap(), "café");
        assert!(TextEncoding::Latin1.encode("€").is_err());
    }

    #[test]
    fn test_utf8_rejects_invalid() {
        assert!(TextEncoding::Utf8.decode(b"\xff\xfe").is_err());
        assert_eq!(TextEncoding::Utf8.decode_lossy(b"a\xffb"), "a\u{fffd}b");
    }
}
