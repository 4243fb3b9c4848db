//! Statement execution against a borrowed connection.
//!
//! Every statement is prepared, bound, stepped and finalized inside a single
//! call. Result sets are materialized eagerly, so no statement outlives the
//! function that created it.

use rusqlite::{Batch, Connection, Row, Statement};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::param::{bind_all, Parameter};
use crate::transaction::Transaction;
use crate::value::{ResultRow, Value};

/// Per-row callback for bulk statements. Returning `Err` stops the batch;
/// the error text becomes the abort reason.
pub type StatementsCallback<'a> = dyn FnMut(&ResultRow) -> anyhow::Result<()> + 'a;

/// Statement surface shared by the manager and by transaction handles.
///
/// Failures never escape as `Err`: they surface as `false`, `None` or a zero
/// value, and the error is kept as the manager's last error.
pub trait Database {
    /// Runs an INSERT/UPDATE/DELETE/DDL statement with `?` parameters.
    ///
    /// Only the first statement in `sql` is compiled; anything after it is
    /// ignored. Use [`execute_statements`](Self::execute_statements) for
    /// multi-statement scripts.
    fn execute_update(&self, sql: &str, params: &[Parameter]) -> bool;

    /// Runs a SELECT. `None` means the query failed; an empty vector means
    /// it matched nothing.
    fn execute_query(&self, sql: &str, params: &[Parameter]) -> Option<Vec<ResultRow>>;

    /// Runs a semicolon-separated script, feeding result rows to `callback`.
    fn execute_statements(&self, sql: &str, callback: Option<&mut StatementsCallback<'_>>)
        -> bool;

    /// Runs `unit` inside BEGIN/COMMIT; a `false` from the unit rolls back.
    /// Returns `true` only when the transaction committed.
    fn begin_transaction<F>(&self, unit: F) -> bool
    where
        F: FnOnce(&Transaction<'_>) -> bool;

    /// Rowid of the most recent successful INSERT on the connection.
    fn last_insert_row_id(&self) -> i64;

    /// Rows modified by the most recent statement.
    fn changes(&self) -> usize;

    /// Column 0 of row 0 of `sql`, if the query succeeded and produced a row.
    fn scalar_for_query(&self, sql: &str) -> Option<Value>;

    fn long_for_query(&self, sql: &str) -> i64 {
        self.scalar_for_query(sql).map_or(0, |v| v.to_i64())
    }

    /// Truncates to the low 32 bits, like `sqlite3_column_int`.
    fn int_for_query(&self, sql: &str) -> i32 {
        self.long_for_query(sql) as i32
    }

    fn double_for_query(&self, sql: &str) -> f64 {
        self.scalar_for_query(sql).map_or(0.0, |v| v.to_f64())
    }

    fn string_for_query(&self, sql: &str) -> String {
        self.scalar_for_query(sql)
            .map(|v| v.to_text())
            .unwrap_or_default()
    }
}

/// Runs a single mutating statement, stepping it once.
///
/// A statement that produces a row (e.g. some PRAGMAs) still counts as a
/// success; the row is discarded.
pub(crate) fn execute(conn: &Connection, sql: &str, params: &[Parameter]) -> DbResult<()> {
    debug!(sql, params = params.len(), "execute");
    let mut stmt = prepare(conn, sql)?;
    bind_all(&mut stmt, params)?;
    let mut rows = stmt.raw_query();
    rows.next().map_err(|e| DbError::step(&e))?;
    Ok(())
}

/// Runs a query and materializes every row, in engine order.
pub(crate) fn query(
    conn: &Connection,
    sql: &str,
    params: &[Parameter],
) -> DbResult<Vec<ResultRow>> {
    debug!(sql, params = params.len(), "query");
    let mut stmt = prepare(conn, sql)?;
    bind_all(&mut stmt, params)?;
    let columns = column_names(&stmt);
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| DbError::step(&e))? {
        out.push(materialize(row, &columns)?);
    }
    Ok(out)
}

/// First column of the first row, if any.
pub(crate) fn scalar(conn: &Connection, sql: &str) -> DbResult<Option<Value>> {
    let rows = query(conn, sql, &[])?;
    Ok(rows.into_iter().next().and_then(|row| row.get_index(0).cloned()))
}

/// Runs a semicolon-separated script, statement by statement.
///
/// Rows produced by any statement are handed to `callback` when one is
/// supplied and discarded otherwise. The first callback error stops the
/// script; statements after it are not run.
pub(crate) fn execute_statements(
    conn: &Connection,
    sql: &str,
    mut callback: Option<&mut StatementsCallback<'_>>,
) -> DbResult<()> {
    debug!(sql, with_callback = callback.is_some(), "execute statements");
    let mut batch = Batch::new(conn, sql);
    while let Some(mut stmt) = batch.next().map_err(|e| DbError::prepare(&e))? {
        let columns = column_names(&stmt);
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next().map_err(|e| DbError::step(&e))? {
            if let Some(callback) = callback.as_deref_mut() {
                let row = materialize(row, &columns)?;
                callback(&row)
                    .map_err(|reason| DbError::BulkCallbackAborted(format!("{reason:#}")))?;
            }
        }
    }
    Ok(())
}

fn prepare<'conn>(conn: &'conn Connection, sql: &str) -> DbResult<Statement<'conn>> {
    conn.prepare(sql).map_err(|e| DbError::prepare(&e))
}

fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(str::to_owned).collect()
}

fn materialize(row: &Row<'_>, columns: &[String]) -> DbResult<ResultRow> {
    let values = (0..columns.len())
        .map(|i| row.get_ref(i).map(Value::from))
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| DbError::step(&e))?;
    Ok(ResultRow::new(columns.to_vec(), values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    fn people() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER);
             INSERT INTO people (name, age) VALUES ('alice', 30), ('bob', 20);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn execute_reports_constraint_failure_as_step() {
        let conn = people();
        let err = execute(&conn, "INSERT INTO people (name) VALUES (?)", &[Parameter::Null])
            .unwrap_err();
        assert!(matches!(err, DbError::Step { .. }), "{err:?}");
    }

    #[test]
    fn execute_runs_only_first_statement() {
        let conn = people();
        execute(
            &conn,
            "INSERT INTO people (name) VALUES ('carol'); INSERT INTO people (name) VALUES ('dave');",
            &[],
        )
        .unwrap();
        let names = query(&conn, "SELECT name FROM people WHERE id > 2", &[]).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].get("name"), Some(&Value::Text("carol".into())));
    }

    #[test]
    fn execute_rejects_malformed_sql() {
        let conn = people();
        let err = execute(&conn, "INSRT INTO people VALUES (1)", &[]).unwrap_err();
        assert!(matches!(err, DbError::Prepare { .. }));
    }

    #[test]
    fn query_keeps_engine_order_and_columns() {
        let conn = people();
        let rows = query(&conn, "SELECT name, age FROM people ORDER BY age", &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].columns(), ["name", "age"]);
        assert_eq!(rows[0].get("name"), Some(&Value::Text("bob".into())));
        assert_eq!(rows[1].get("age"), Some(&Value::Integer(30)));
    }

    #[test]
    fn query_with_no_match_is_empty() {
        let conn = people();
        let rows = query(&conn, "SELECT * FROM people WHERE age > ?", &params![99]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn scalar_reads_first_cell() {
        let conn = people();
        let value = scalar(&conn, "SELECT count(*), 'ignored' FROM people").unwrap();
        assert_eq!(value, Some(Value::Integer(2)));
        let none = scalar(&conn, "SELECT name FROM people WHERE 0").unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn statements_feed_rows_to_callback() {
        let conn = people();
        let mut seen = Vec::new();
        let mut callback = |row: &ResultRow| -> anyhow::Result<()> {
            seen.push(row.get("name").map(Value::to_text).unwrap_or_default());
            Ok(())
        };
        execute_statements(
            &conn,
            "INSERT INTO people (name, age) VALUES ('carol', 41);
             SELECT name FROM people ORDER BY id;",
            Some(&mut callback),
        )
        .unwrap();
        assert_eq!(seen, ["alice", "bob", "carol"]);
    }

    #[test]
    fn callback_error_stops_remaining_statements() {
        let conn = people();
        let mut callback =
            |_: &ResultRow| -> anyhow::Result<()> { Err(anyhow::anyhow!("enough")) };
        let err = execute_statements(
            &conn,
            "SELECT 1; INSERT INTO people (name, age) VALUES ('dave', 50);",
            Some(&mut callback),
        )
        .unwrap_err();
        assert_eq!(err, DbError::BulkCallbackAborted("enough".into()));
        let count = scalar(&conn, "SELECT count(*) FROM people").unwrap();
        assert_eq!(count, Some(Value::Integer(2)));
    }

    #[test]
    fn statements_without_callback_discard_rows() {
        let conn = people();
        execute_statements(&conn, "SELECT * FROM people; DELETE FROM people;", None).unwrap();
        let count = scalar(&conn, "SELECT count(*) FROM people").unwrap();
        assert_eq!(count, Some(Value::Integer(0)));
    }
}
