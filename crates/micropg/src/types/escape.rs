//! Parameter escaping (Rust → SQL literal text).
//!
//! Queries travel as plain text over the simple-query protocol, so
//! parameters are rendered as SQL literals and substituted into the query
//! template on the client.

use std::fmt::Write;

use micropg_core::Value;

/// Render a value as a SQL literal.
///
/// - `Null` → `NULL`
/// - `Bool` → `TRUE` / `FALSE`
/// - `Text` → single-quoted, embedded `'` doubled
/// - `Bytes` → `'\NNN...'::bytea`, one octal escape per byte
/// - `Array` → `ARRAY[...]` of recursively escaped elements
/// - anything else → its text form, single-quoted
pub fn escape_parameter(value: &Value) -> String {
    let mut out = String::new();
    write_escaped(&mut out, value);
    out
}

fn write_escaped(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("NULL"),
        Value::Bool(true) => out.push_str("TRUE"),
        Value::Bool(false) => out.push_str("FALSE"),
        Value::Text(s) => quote_into(out, s),
        Value::Bytes(bytes) => {
            out.reserve(bytes.len() * 4 + 9);
            out.push('\'');
            for byte in bytes {
                // Writing to a String cannot fail.
                let _ = write!(out, "\\{byte:03o}");
            }
            out.push_str("'::bytea");
        }
        Value::Array(items) => {
            out.push_str("ARRAY[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(out, item);
            }
            out.push(']');
        }
        other @ (Value::Int(_) | Value::Float(_)) => quote_into(out, &other.to_string()),
    }
}

fn quote_into(out: &mut String, s: &str) {
    out.reserve(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
}

/// Substitute escaped parameters into a query template.
///
/// Each `%s` consumes the next argument, strictly left to right, and `%%`
/// stands for a literal `%`; any other `%` is copied as is. With no
/// arguments the template is returned untouched.
///
/// The placeholder count is not checked against `args`: surplus arguments
/// are ignored and surplus placeholders are left in the text, which the
/// server will then reject as malformed SQL.
pub fn format_query(template: &str, args: &[Value]) -> String {
    if args.is_empty() {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len() + args.len() * 8);
    let mut args_iter = args.iter();
    let mut placeholders = 0usize;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('s') => {
                chars.next();
                placeholders += 1;
                match args_iter.next() {
                    Some(arg) => write_escaped(&mut out, arg),
                    None => out.push_str("%s"),
                }
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }

    if placeholders != args.len() {
        tracing::warn!(
            placeholders,
            arguments = args.len(),
            "query placeholder count does not match argument count"
        );
    }

    out
}
