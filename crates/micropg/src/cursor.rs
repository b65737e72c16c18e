//! Cursors and result accumulation.
//!
//! A [`Cursor`] borrows its connection mutably for as long as it lives, so at
//! most one statement can be in flight per connection.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

use micropg_core::{ColumnDescription, ColumnInfo, Error, Result, Row, Value};

use crate::channel::PgStream;
use crate::connection::Connection;
use crate::copy::CopyIo;
use crate::types::{TextEncoding, decode_value, format_query};

/// Rows, column metadata and row count of the statement(s) last executed.
#[derive(Debug)]
pub(crate) struct ResultSet {
    columns: Option<Arc<ColumnInfo>>,
    rows: VecDeque<Row>,
    row_count: i64,
}

impl Default for ResultSet {
    fn default() -> Self {
        Self {
            columns: None,
            rows: VecDeque::new(),
            row_count: -1,
        }
    }
}

impl ResultSet {
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    /// Start a new result set. Rows of an earlier statement in the same
    /// round are dropped, so every buffered row matches `columns`.
    pub(crate) fn set_columns(&mut self, columns: Vec<ColumnDescription>) {
        self.rows.clear();
        self.columns = Some(Arc::new(ColumnInfo::new(columns)));
    }

    /// Decode one DataRow against the current column set and buffer it.
    #[allow(clippy::result_large_err)]
    pub(crate) fn push_row(
        &mut self,
        raw: Vec<Option<Vec<u8>>>,
        encoding: TextEncoding,
    ) -> Result<()> {
        let columns = self
            .columns
            .clone()
            .ok_or_else(|| Error::protocol("DataRow received before RowDescription"))?;

        if raw.len() != columns.len() {
            return Err(Error::protocol(format!(
                "DataRow has {} values but RowDescription announced {} columns",
                raw.len(),
                columns.len()
            )));
        }

        let values = raw
            .iter()
            .zip(columns.descriptions())
            .map(|(data, column)| decode_value(column.type_oid, data.as_deref(), encoding))
            .collect::<Result<Vec<Value>>>()?;

        let row = Row::new(columns, values)
            .ok_or_else(|| Error::protocol("row length does not match column count"))?;
        self.rows.push_back(row);
        Ok(())
    }

    pub(crate) fn command_complete(&mut self, tag: &str) {
        if let Some(count) = parse_row_count(tag) {
            self.row_count = count;
        }
    }
}

/// Affected-row count carried by a CommandComplete tag.
///
/// `SHOW` always counts as one row; tags without a count yield `None`.
pub fn parse_row_count(tag: &str) -> Option<i64> {
    let command = tag.split(' ').next()?;
    match command {
        "SHOW" => Some(1),
        "SELECT" | "UPDATE" | "DELETE" | "INSERT" | "MOVE" | "FETCH" | "COPY" | "MERGE" => {
            tag.rsplit(' ').next()?.parse().ok()
        }
        _ => None,
    }
}

/// Executes statements on a borrowed connection and buffers their results.
pub struct Cursor<'c, S: Read + Write = PgStream> {
    conn: &'c mut Connection<S>,
    result: ResultSet,
    query: Option<String>,
}

impl<S: Read + Write> std::fmt::Debug for Cursor<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("query", &self.query)
            .field("rows", &self.result.rows.len())
            .field("row_count", &self.result.row_count)
            .finish_non_exhaustive()
    }
}

impl<'c, S: Read + Write> Cursor<'c, S> {
    pub(crate) fn new(conn: &'c mut Connection<S>) -> Self {
        Self {
            conn,
            result: ResultSet::default(),
            query: None,
        }
    }

    /// Execute a statement, substituting `args` for its `%s` placeholders.
    ///
    /// Opens a transaction first unless one is already open, and commits
    /// afterwards when the connection is in autocommit mode. Previous results
    /// are discarded.
    #[tracing::instrument(level = "debug", skip(self, args), fields(args = args.len()))]
    pub fn execute(&mut self, query: &str, args: &[Value]) -> Result<()> {
        self.run(query, args, CopyIo::none())
    }

    /// Execute a `COPY ... FROM STDIN`, streaming `source` to the server.
    pub fn copy_in<R: Read>(&mut self, query: &str, source: &mut R) -> Result<()> {
        self.run(query, &[], CopyIo::from_source(source))
    }

    /// Execute a `COPY ... TO STDOUT`, streaming the server's data to `sink`.
    pub fn copy_out<W: Write>(&mut self, query: &str, sink: &mut W) -> Result<()> {
        self.run(query, &[], CopyIo::to_sink(sink))
    }

    #[allow(clippy::result_large_err)]
    fn run(&mut self, query: &str, args: &[Value], copy: CopyIo<'_>) -> Result<()> {
        self.result.clear();
        let sql = format_query(query, args);
        let outcome = self.conn.execute_in_transaction(&sql, &mut self.result, copy);
        self.query = Some(sql);
        outcome
    }

    /// Take every buffered row, leaving the cursor empty.
    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.result.rows.drain(..).collect()
    }

    /// Take the next buffered row.
    pub fn fetch_one(&mut self) -> Option<Row> {
        self.result.rows.pop_front()
    }

    /// Take up to `n` buffered rows.
    pub fn fetch_many(&mut self, n: usize) -> Vec<Row> {
        let n = n.min(self.result.rows.len());
        self.result.rows.drain(..n).collect()
    }

    /// Column metadata of the last result set, if it returned rows.
    pub fn description(&self) -> Option<&[ColumnDescription]> {
        self.result.columns.as_deref().map(ColumnInfo::descriptions)
    }

    /// Affected or returned row count of the last statement; `-1` when unknown.
    pub fn row_count(&self) -> i64 {
        self.result.row_count
    }

    /// The last query text sent, after parameter substitution.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The connection this cursor runs on.
    pub fn connection(&mut self) -> &mut Connection<S> {
        self.conn
    }
}
