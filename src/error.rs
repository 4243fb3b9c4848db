//! Error taxonomy for the serialized access layer.
//!
//! Engine failures keep the SQLite extended result code and message so the
//! manager can expose them through its last-error slot.

use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::warn;

/// Code reported for errors raised by this layer rather than by SQLite.
pub const LOCAL_ERROR_CODE: i32 = -1;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors raised while driving the single managed connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// The store could not be opened or configured.
    #[error("open failed ({code}): {message}")]
    Open { code: i32, message: String },

    /// The SQL text could not be compiled (malformed SQL).
    #[error("prepare failed ({code}): {message}")]
    Prepare { code: i32, message: String },

    /// Parameters did not match the statement's placeholders or could not be bound.
    #[error("bind failed ({code}): {message}")]
    Bind { code: i32, message: String },

    /// Execution failed (constraint violation, I/O error, ...).
    #[error("step failed ({code}): {message}")]
    Step { code: i32, message: String },

    /// The connection was closed; it is never reopened implicitly.
    #[error("connection is closed")]
    ConnectionClosed,

    /// A transaction is already running on the connection.
    #[error("transaction already active")]
    TransactionAlreadyActive,

    /// `BEGIN` was rejected; the unit of work was not run.
    #[error("transaction begin failed ({code}): {message}")]
    TransactionBegin { code: i32, message: String },

    /// `COMMIT` was rejected; the transaction was rolled back.
    #[error("transaction commit failed ({code}): {message}")]
    TransactionCommit { code: i32, message: String },

    /// A bulk-statement callback asked to stop.
    #[error("bulk execution aborted by callback: {0}")]
    BulkCallbackAborted(String),

    /// The calling thread already holds the connection (e.g. a unit of work
    /// calling back into the manager instead of using its handle).
    #[error("reentrant access from a thread already holding the connection")]
    ReentrantAccess,

    /// The engine refused to close the handle cleanly.
    #[error("close failed ({code}): {message}")]
    Close { code: i32, message: String },

    /// Manager configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DbError {
    /// SQLite extended result code, or [`LOCAL_ERROR_CODE`] for layer errors.
    pub fn code(&self) -> i32 {
        match self {
            Self::Open { code, .. }
            | Self::Prepare { code, .. }
            | Self::Bind { code, .. }
            | Self::Step { code, .. }
            | Self::TransactionBegin { code, .. }
            | Self::TransactionCommit { code, .. }
            | Self::Close { code, .. } => *code,
            Self::ConnectionClosed
            | Self::TransactionAlreadyActive
            | Self::BulkCallbackAborted(_)
            | Self::ReentrantAccess
            | Self::Config(_) => LOCAL_ERROR_CODE,
        }
    }

    pub(crate) fn open(err: &rusqlite::Error) -> Self {
        let (code, message) = engine_detail(err);
        Self::Open { code, message }
    }

    pub(crate) fn prepare(err: &rusqlite::Error) -> Self {
        let (code, message) = engine_detail(err);
        Self::Prepare { code, message }
    }

    pub(crate) fn bind(err: &rusqlite::Error) -> Self {
        let (code, message) = engine_detail(err);
        Self::Bind { code, message }
    }

    pub(crate) fn step(err: &rusqlite::Error) -> Self {
        let (code, message) = engine_detail(err);
        Self::Step { code, message }
    }

    pub(crate) fn begin(err: &rusqlite::Error) -> Self {
        let (code, message) = engine_detail(err);
        Self::TransactionBegin { code, message }
    }

    pub(crate) fn commit(err: &rusqlite::Error) -> Self {
        let (code, message) = engine_detail(err);
        Self::TransactionCommit { code, message }
    }

    pub(crate) fn close(err: &rusqlite::Error) -> Self {
        let (code, message) = engine_detail(err);
        Self::Close { code, message }
    }

    /// Placeholder/parameter count mismatch.
    pub(crate) fn param_count(expected: usize, supplied: usize) -> Self {
        Self::Bind {
            code: rusqlite::ffi::SQLITE_RANGE,
            message: format!("statement expects {expected} parameters, {supplied} supplied"),
        }
    }
}

/// Splits a rusqlite error into the engine's extended code and message.
fn engine_detail(err: &rusqlite::Error) -> (i32, String) {
    match err {
        rusqlite::Error::SqliteFailure(inner, Some(message)) => {
            (inner.extended_code, message.clone())
        }
        rusqlite::Error::SqliteFailure(inner, None) => (inner.extended_code, inner.to_string()),
        other => (LOCAL_ERROR_CODE, other.to_string()),
    }
}

/// Most recent failure seen by a manager, kept for diagnostics.
#[derive(Debug, Default)]
pub(crate) struct LastError(Mutex<Option<DbError>>);

impl LastError {
    /// Stores the error of a failed result and hands back the success value.
    pub(crate) fn capture<T>(&self, result: DbResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.record(err);
                None
            }
        }
    }

    pub(crate) fn record(&self, err: DbError) {
        warn!(code = err.code(), error = %err, "database operation failed");
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    pub(crate) fn get(&self) -> Option<DbError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn clear(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
