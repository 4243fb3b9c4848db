//! Transactional units of work.

use rusqlite::Connection;
use tracing::{debug, error, warn};

use crate::config::TransactionBehavior;
use crate::error::{DbError, DbResult, LastError};
use crate::executor::{self, Database, StatementsCallback};
use crate::param::Parameter;
use crate::value::{ResultRow, Value};

/// Handle given to a unit of work while its transaction is open.
///
/// Statements issued through it run on the transaction's connection without
/// going back through the manager's gate, which the unit's thread already
/// holds.
pub struct Transaction<'a> {
    conn: &'a Connection,
    last_error: &'a LastError,
}

impl Database for Transaction<'_> {
    fn execute_update(&self, sql: &str, params: &[Parameter]) -> bool {
        self.last_error
            .capture(executor::execute(self.conn, sql, params))
            .is_some()
    }

    fn execute_query(&self, sql: &str, params: &[Parameter]) -> Option<Vec<ResultRow>> {
        self.last_error
            .capture(executor::query(self.conn, sql, params))
    }

    fn execute_statements(
        &self,
        sql: &str,
        callback: Option<&mut StatementsCallback<'_>>,
    ) -> bool {
        self.last_error
            .capture(executor::execute_statements(self.conn, sql, callback))
            .is_some()
    }

    /// Always fails: transactions do not nest.
    fn begin_transaction<F>(&self, _unit: F) -> bool
    where
        F: FnOnce(&Transaction<'_>) -> bool,
    {
        self.last_error.record(DbError::TransactionAlreadyActive);
        false
    }

    fn last_insert_row_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    fn changes(&self) -> usize {
        usize::try_from(self.conn.changes()).unwrap_or(0)
    }

    fn scalar_for_query(&self, sql: &str) -> Option<Value> {
        self.last_error
            .capture(executor::scalar(self.conn, sql))
            .flatten()
    }
}

/// Runs `unit` between BEGIN and COMMIT/ROLLBACK.
///
/// Returns `Ok(true)` when committed and `Ok(false)` when the unit asked for
/// a rollback. A failed BEGIN never runs the unit; a failed COMMIT is rolled
/// back and reported.
pub(crate) fn run<F>(
    conn: &Connection,
    behavior: TransactionBehavior,
    last_error: &LastError,
    unit: F,
) -> DbResult<bool>
where
    F: FnOnce(&Transaction<'_>) -> bool,
{
    if !conn.is_autocommit() {
        return Err(DbError::TransactionAlreadyActive);
    }
    let active = ActiveTransaction::begin(conn, behavior)?;
    let handle = Transaction { conn, last_error };
    if unit(&handle) {
        active.commit()?;
        Ok(true)
    } else {
        active.rollback();
        Ok(false)
    }
}

/// Open transaction; rolls back on drop unless finished, so a panicking
/// unit of work leaves nothing applied.
struct ActiveTransaction<'a> {
    conn: &'a Connection,
    finished: bool,
}

impl<'a> ActiveTransaction<'a> {
    fn begin(conn: &'a Connection, behavior: TransactionBehavior) -> DbResult<Self> {
        conn.execute_batch(behavior.begin_sql())
            .map_err(|e| DbError::begin(&e))?;
        debug!(?behavior, "transaction started");
        Ok(Self {
            conn,
            finished: false,
        })
    }

    fn commit(mut self) -> DbResult<()> {
        self.finished = true;
        match self.conn.execute_batch("COMMIT") {
            Ok(()) => {
                debug!("transaction committed");
                Ok(())
            }
            Err(e) => {
                let err = DbError::commit(&e);
                error!(error = %err, "commit failed, rolling back");
                rollback(self.conn);
                Err(err)
            }
        }
    }

    fn rollback(mut self) {
        self.finished = true;
        rollback(self.conn);
        debug!("transaction rolled back");
    }
}

impl Drop for ActiveTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("unit of work did not finish, rolling back");
            rollback(self.conn);
        }
    }
}

/// Best-effort rollback. Skipped when the engine already ended the
/// transaction on its own.
fn rollback(conn: &Connection) {
    if conn.is_autocommit() {
        return;
    }
    if let Err(e) = conn.execute_batch("ROLLBACK") {
        error!(error = %e, "rollback failed");
    }
}
