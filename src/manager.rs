//! The database manager: connection lifecycle plus the access gate.
//!
//! Every public operation is admitted through one mutex, so at most one
//! operation (or one whole transaction) touches the connection at a time.
//! Callers arriving while the gate is held block until it is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::{DbPath, ManagerConfig};
use crate::error::{DbError, DbResult, LastError};
use crate::executor::{self, Database, StatementsCallback};
use crate::param::Parameter;
use crate::transaction::{self, Transaction};
use crate::value::{ResultRow, Value};

/// Explicitly owned handle to the single managed connection.
///
/// Cloning is cheap and every clone shares the same connection, so the
/// manager can be handed to as many threads as needed. The connection opens
/// lazily on first use (or via [`open`](Self::open)) and closes on
/// [`close`](Self::close) or when the last clone is dropped.
#[derive(Clone)]
pub struct DatabaseManager {
    inner: Arc<Inner>,
}

struct Inner {
    gate: Mutex<ConnectionState>,
    /// Thread currently admitted through the gate, used to reject reentrant
    /// calls that would otherwise deadlock.
    holder: Mutex<Option<Holder>>,
    config: Mutex<ManagerConfig>,
    last_error: LastError,
}

enum ConnectionState {
    Unopened,
    Open(Connection),
    Closed,
}

#[derive(Clone, Copy)]
struct Holder {
    thread: ThreadId,
    in_transaction: bool,
}

/// Proof of admission through the gate. Releasing it lets the next caller in.
struct Admission<'a> {
    state: MutexGuard<'a, ConnectionState>,
    holder: &'a Mutex<Option<Holder>>,
    config: &'a Mutex<ManagerConfig>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking unit of work has already been rolled back by the time the
    // lock is released, so the guarded state is still consistent.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Admission<'_> {
    /// The open connection, opening it first if this is the first use.
    fn connection(&mut self) -> DbResult<&Connection> {
        if matches!(*self.state, ConnectionState::Unopened) {
            let config = lock(self.config).clone();
            *self.state = ConnectionState::Open(open_connection(&config)?);
        }
        match &*self.state {
            ConnectionState::Open(conn) => Ok(conn),
            ConnectionState::Closed | ConnectionState::Unopened => Err(DbError::ConnectionClosed),
        }
    }

    fn enter_transaction(&self) {
        if let Some(holder) = lock(self.holder).as_mut() {
            holder.in_transaction = true;
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        *lock(self.holder) = None;
    }
}

fn open_connection(config: &ManagerConfig) -> DbResult<Connection> {
    let conn = match &config.db_path {
        DbPath::Memory => Connection::open_in_memory(),
        DbPath::File(path) => Connection::open(path),
    }
    .map_err(|e| DbError::open(&e))?;
    if let Some(timeout) = config.busy_timeout {
        conn.busy_timeout(timeout).map_err(|e| DbError::open(&e))?;
    }
    for pragma in &config.pragmas {
        conn.execute_batch(pragma).map_err(|e| DbError::open(&e))?;
    }
    info!(path = %config.db_path, "database opened");
    Ok(conn)
}

impl DatabaseManager {
    /// Create a manager; the connection is not opened until first use.
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                gate: Mutex::new(ConnectionState::Unopened),
                holder: Mutex::new(None),
                config: Mutex::new(config),
                last_error: LastError::default(),
            }),
        }
    }

    /// Create a manager and open its connection right away.
    pub fn open_with(config: ManagerConfig) -> DbResult<Self> {
        let manager = Self::new(config);
        manager.with_connection(|_| Ok(()))?;
        Ok(manager)
    }

    /// Waits for the gate. Fails fast when the calling thread already holds
    /// it, since blocking would deadlock.
    fn admit(&self, for_transaction: bool) -> DbResult<Admission<'_>> {
        let me = thread::current().id();
        if let Some(holder) = *lock(&self.inner.holder) {
            if holder.thread == me {
                return Err(if for_transaction && holder.in_transaction {
                    DbError::TransactionAlreadyActive
                } else {
                    DbError::ReentrantAccess
                });
            }
        }
        let state = lock(&self.inner.gate);
        *lock(&self.inner.holder) = Some(Holder {
            thread: me,
            in_transaction: false,
        });
        Ok(Admission {
            state,
            holder: &self.inner.holder,
            config: &self.inner.config,
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&Connection) -> DbResult<T>) -> DbResult<T> {
        let mut admission = self.admit(false)?;
        op(admission.connection()?)
    }

    /// Opens the connection if it is not open yet. Idempotent; fails once
    /// the manager has been closed.
    pub fn open(&self) -> bool {
        self.inner
            .last_error
            .capture(self.with_connection(|_| Ok(())))
            .is_some()
    }

    /// Closes the connection. Later operations, including a second
    /// `close`, fail with [`DbError::ConnectionClosed`].
    pub fn close(&self) -> bool {
        let result = self.admit(false).and_then(|mut admission| {
            match std::mem::replace(&mut *admission.state, ConnectionState::Closed) {
                ConnectionState::Unopened => Ok(()),
                ConnectionState::Closed => Err(DbError::ConnectionClosed),
                ConnectionState::Open(conn) => {
                    conn.flush_prepared_statement_cache();
                    conn.close().map_err(|(_, e)| DbError::close(&e))?;
                    info!("database closed");
                    Ok(())
                }
            }
        });
        self.inner.last_error.capture(result).is_some()
    }

    pub fn is_open(&self) -> bool {
        let result = self
            .admit(false)
            .map(|admission| matches!(*admission.state, ConnectionState::Open(_)));
        self.inner.last_error.capture(result).unwrap_or(false)
    }

    pub fn db_path(&self) -> DbPath {
        lock(&self.inner.config).db_path.clone()
    }

    /// Points the manager at a different store. Only allowed before the
    /// connection is first opened.
    pub fn set_db_path(&self, path: impl Into<DbPath>) -> bool {
        let path = path.into();
        let result = self.admit(false).and_then(|admission| {
            if !matches!(*admission.state, ConnectionState::Unopened) {
                return Err(DbError::Config(
                    "database path can only change before the first open".to_string(),
                ));
            }
            debug!(path = %path, "database path set");
            lock(&self.inner.config).db_path = path;
            Ok(())
        });
        self.inner.last_error.capture(result).is_some()
    }

    pub fn config(&self) -> ManagerConfig {
        lock(&self.inner.config).clone()
    }

    /// Most recent failure, if any operation has failed since the last
    /// [`clear_last_error`](Self::clear_last_error).
    pub fn last_error(&self) -> Option<DbError> {
        self.inner.last_error.get()
    }

    pub fn clear_last_error(&self) {
        self.inner.last_error.clear();
    }
}

impl Database for DatabaseManager {
    fn execute_update(&self, sql: &str, params: &[Parameter]) -> bool {
        let result = self.with_connection(|conn| executor::execute(conn, sql, params));
        self.inner.last_error.capture(result).is_some()
    }

    fn execute_query(&self, sql: &str, params: &[Parameter]) -> Option<Vec<ResultRow>> {
        let result = self.with_connection(|conn| executor::query(conn, sql, params));
        self.inner.last_error.capture(result)
    }

    fn execute_statements(
        &self,
        sql: &str,
        callback: Option<&mut StatementsCallback<'_>>,
    ) -> bool {
        let result =
            self.with_connection(|conn| executor::execute_statements(conn, sql, callback));
        self.inner.last_error.capture(result).is_some()
    }

    /// Holds the gate for the whole transaction, including however long
    /// `unit` runs. `unit` must use the handle it is given; calling back into
    /// the manager from inside it fails with [`DbError::ReentrantAccess`]
    /// (or [`DbError::TransactionAlreadyActive`] for `begin_transaction`).
    fn begin_transaction<F>(&self, unit: F) -> bool
    where
        F: FnOnce(&Transaction<'_>) -> bool,
    {
        let result = self.admit(true).and_then(|mut admission| {
            admission.enter_transaction();
            let behavior = lock(&self.inner.config).transaction_behavior;
            let conn = admission.connection()?;
            transaction::run(conn, behavior, &self.inner.last_error, unit)
        });
        self.inner.last_error.capture(result).unwrap_or(false)
    }

    /// Zero when the connection is closed.
    fn last_insert_row_id(&self) -> i64 {
        let result = self.with_connection(|conn| Ok(conn.last_insert_rowid()));
        self.inner.last_error.capture(result).unwrap_or(0)
    }

    fn changes(&self) -> usize {
        let result =
            self.with_connection(|conn| Ok(usize::try_from(conn.changes()).unwrap_or(0)));
        self.inner.last_error.capture(result).unwrap_or(0)
    }

    fn scalar_for_query(&self, sql: &str) -> Option<Value> {
        let result = self.with_connection(|conn| executor::scalar(conn, sql));
        self.inner.last_error.capture(result).flatten()
    }
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("db_path", &self.db_path())
            .finish_non_exhaustive()
    }
}
