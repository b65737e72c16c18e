//! Core types for the micropg PostgreSQL client.
//!
//! This crate holds the protocol-agnostic pieces shared by the driver:
//!
//! - `Error` with one variant per failure kind a caller can act on
//! - `Value`, the dynamically-typed SQL scalar used for parameters and results
//! - `ColumnDescription` and `Row` for result sets

pub mod error;
pub mod row;
pub mod value;

pub use error::{Error, Result};
pub use row::{ColumnDescription, ColumnInfo, Row};
pub use value::Value;
