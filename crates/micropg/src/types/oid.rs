//! PostgreSQL type Object IDs (OIDs).
//!
//! PostgreSQL identifies types by numeric OIDs. This module defines
//! the well-known OIDs the text decoder and RowDescription parser care about.

/// Boolean type
pub const BOOL: u32 = 16;

/// Byte array (bytea)
pub const BYTEA: u32 = 17;

/// Single character (char)
pub const CHAR: u32 = 18;

/// Name type (internal, 63-byte identifier)
pub const NAME: u32 = 19;

/// 8-byte signed integer (int8/bigint)
pub const INT8: u32 = 20;

/// 2-byte signed integer (int2/smallint)
pub const INT2: u32 = 21;

/// 4-byte signed integer (int4/integer)
pub const INT4: u32 = 23;

/// Variable-length text (text)
pub const TEXT: u32 = 25;

/// Object identifier (oid)
pub const OID: u32 = 26;

/// JSON (text-based)
pub const JSON: u32 = 114;

/// Single-precision floating point (float4/real)
pub const FLOAT4: u32 = 700;

/// Double-precision floating point (float8/double precision)
pub const FLOAT8: u32 = 701;

/// Fixed-length character (bpchar)
pub const BPCHAR: u32 = 1042;

/// Variable-length character with limit (varchar)
pub const VARCHAR: u32 = 1043;

/// Date (no time)
pub const DATE: u32 = 1082;

/// Time without time zone
pub const TIME: u32 = 1083;

/// Timestamp without time zone
pub const TIMESTAMP: u32 = 1114;

/// Timestamp with time zone
pub const TIMESTAMPTZ: u32 = 1184;

/// Arbitrary precision numeric
pub const NUMERIC: u32 = 1700;

/// UUID
pub const UUID: u32 = 2950;

/// Binary JSON
pub const JSONB: u32 = 3802;

/// Does this OID decode to a boolean?
pub const fn is_bool(oid: u32) -> bool {
    oid == BOOL
}

/// Does this OID belong to the integer family?
pub const fn is_integer(oid: u32) -> bool {
    matches!(oid, INT2 | INT4 | INT8 | OID)
}

/// Does this OID belong to the floating-point family?
pub const fn is_float(oid: u32) -> bool {
    matches!(oid, FLOAT4 | FLOAT8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families() {
        assert!(is_bool(BOOL));
        assert!(is_integer(INT2) && is_integer(INT4) && is_integer(INT8) && is_integer(OID));
        assert!(is_float(FLOAT4) && is_float(FLOAT8));
        assert!(!is_integer(NUMERIC));
        assert!(!is_float(NUMERIC));
        assert!(!is_integer(TEXT));
    }
}
