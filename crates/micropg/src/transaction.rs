//! Transaction control.
//!
//! Every statement run through a cursor executes inside an explicit
//! transaction block: one is opened on demand before the statement and, in
//! autocommit mode, committed right after it. `commit` and `rollback`
//! immediately open the next block, so a connection outside autocommit mode
//! is always inside one.

use std::io::{Read, Write};

use micropg_core::Result;

use crate::connection::{Connection, ReadyState};
use crate::copy::CopyIo;
use crate::cursor::ResultSet;

impl<S: Read + Write> Connection<S> {
    /// Open a transaction block.
    ///
    /// A failed block is rolled back first. Does nothing on a closed
    /// connection.
    #[allow(clippy::result_large_err)]
    pub fn begin(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if self.ready_state() == ReadyState::Error {
            tracing::debug!("rolling back failed transaction before BEGIN");
            self.round_trip("ROLLBACK", None, CopyIo::none())?;
        }
        tracing::debug!("BEGIN");
        self.round_trip("BEGIN", None, CopyIo::none())
    }

    /// Commit the current transaction and open the next one.
    ///
    /// Does nothing on a closed connection.
    #[allow(clippy::result_large_err)]
    pub fn commit(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        tracing::debug!("COMMIT");
        self.round_trip("COMMIT", None, CopyIo::none())?;
        self.begin()
    }

    /// Roll back the current transaction and open the next one.
    ///
    /// Does nothing on a closed connection.
    #[allow(clippy::result_large_err)]
    pub fn rollback(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        tracing::debug!("ROLLBACK");
        self.round_trip("ROLLBACK", None, CopyIo::none())?;
        self.begin()
    }

    /// Run one statement under the transaction rules and collect its results.
    #[allow(clippy::result_large_err)]
    pub(crate) fn execute_in_transaction(
        &mut self,
        sql: &str,
        result: &mut ResultSet,
        copy: CopyIo<'_>,
    ) -> Result<()> {
        if self.ready_state() != ReadyState::InTransaction {
            self.begin()?;
        }
        self.round_trip(sql, Some(result), copy)?;
        if self.autocommit() {
            self.commit()?;
        }
        Ok(())
    }
}
