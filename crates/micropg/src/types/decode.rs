//! Text-format value decoding (PostgreSQL → `Value`).
//!
//! Results are always requested in text format. A column's type OID only
//! decides how far the decoded text is interpreted: booleans, the integer
//! family and the float family become native scalars, everything else
//! (numeric, varchar, date/time, unknown types) stays text so no precision
//! is silently lost.

use micropg_core::error::ProtocolError;
use micropg_core::{Error, Result, Value};

use super::TextEncoding;
use super::oid;

/// Decode one column value.
///
/// `data` is `None` for SQL NULL, which short-circuits before any decoding.
pub fn decode_value(type_oid: u32, data: Option<&[u8]>, encoding: TextEncoding) -> Result<Value> {
    let Some(data) = data else {
        return Ok(Value::Null);
    };

    let text = encoding.decode(data)?;

    if oid::is_bool(type_oid) {
        return Ok(Value::Bool(text == "t"));
    }
    if oid::is_integer(type_oid) {
        return text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| type_error(type_oid, &text));
    }
    if oid::is_float(type_oid) {
        return parse_float(text.trim())
            .map(Value::Float)
            .ok_or_else(|| type_error(type_oid, &text));
    }

    Ok(Value::Text(text.into_owned()))
}

fn parse_float(s: &str) -> Option<f64> {
    match s {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => s.parse().ok(),
    }
}

fn type_error(type_oid: u32, text: &str) -> Error {
    let shown: String = text.chars().take(32).collect();
    Error::Protocol(ProtocolError {
        message: format!("cannot decode {:?} as a value of type OID {}", shown, type_oid),
        raw_data: Some(text.as_bytes().to_vec()),
        ..Default::default()
    })
}
