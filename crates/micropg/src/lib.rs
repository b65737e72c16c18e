//! Blocking PostgreSQL client for memory-constrained devices.
//!
//! `micropg` speaks the PostgreSQL frontend/backend protocol v3.0 directly
//! over a blocking byte channel. It keeps to the simple-query protocol with
//! text-format results, so a whole session needs little more than one
//! reusable write buffer and the rows of the current result.
//!
//! It provides:
//!
//! - Message framing and the tag-driven dispatch loop
//! - Authentication (trust, cleartext, MD5, SCRAM-SHA-256)
//! - Text-format decoding of result columns by type OID
//! - Client-side parameter escaping (`%s` placeholders)
//! - An implicit-transaction controller with optional autocommit
//! - The COPY sub-protocol in both directions
//! - TLS via rustls (feature `tls`)
//!
//! # Example
//!
//! ```rust,ignore
//! use micropg::{PgConfig, Value};
//!
//! let config = PgConfig::new("localhost", "postgres")
//!     .password("secret")
//!     .database("mydb");
//!
//! let mut conn = micropg::connect(config)?;
//! let mut cur = conn.cursor();
//! cur.execute("INSERT INTO notes (body) VALUES (%s)", &[Value::from("it's here")])?;
//! cur.execute("SELECT count(*) FROM notes", &[])?;
//! let count = cur.fetch_one().and_then(|row| row.get(0).and_then(Value::as_i64));
//! conn.commit()?;
//! conn.close()?;
//! ```

pub mod auth;
pub mod channel;
pub mod config;
pub mod connection;
pub mod copy;
pub mod cursor;
pub mod protocol;
#[cfg(feature = "tls")]
mod tls;
pub mod transaction;
pub mod types;

pub use channel::PgStream;
pub use config::{DEFAULT_PORT, PgConfig, SslMode};
pub use connection::{Connection, ReadyState};
pub use copy::COPY_CHUNK_SIZE;
pub use cursor::{Cursor, parse_row_count};
pub use micropg_core::error::{
    AuthError, ConfigError, ConnectionError, ConnectionErrorKind, NotSupportedError, ProtocolError,
};
pub use micropg_core::{ColumnDescription, ColumnInfo, Error, Result, Row, Value};
pub use types::{TextEncoding, escape_parameter, format_query};

/// Open a connection to the server described by `config`.
#[allow(clippy::result_large_err)]
pub fn connect(config: PgConfig) -> Result<Connection> {
    Connection::connect(config)
}

/// Create a database, connecting without a target database.
///
/// `name` is interpolated into the statement as is and must come from a
/// trusted source.
#[allow(clippy::result_large_err)]
pub fn create_database(config: &PgConfig, name: &str) -> Result<()> {
    run_maintenance(config, &format!("CREATE DATABASE {}", name))
}

/// Drop a database, connecting without a target database.
///
/// `name` is interpolated into the statement as is and must come from a
/// trusted source.
#[allow(clippy::result_large_err)]
pub fn drop_database(config: &PgConfig, name: &str) -> Result<()> {
    run_maintenance(config, &format!("DROP DATABASE {}", name))
}

#[allow(clippy::result_large_err)]
fn run_maintenance(config: &PgConfig, sql: &str) -> Result<()> {
    let mut config = config.clone();
    config.database = None;
    let mut conn = Connection::connect(config)?;
    conn.simple_query(sql)?;
    conn.close()
}
