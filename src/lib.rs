//! Serialized single-connection SQLite access layer.
//!
//! # Intention
//!
//! - Give any number of threads safe, ordered access to one SQLite
//!   connection through an explicitly owned [`DatabaseManager`].
//! - Bind typed [`Parameter`]s to `?` placeholders, materialize results as
//!   [`ResultRow`]s, and run units of work inside BEGIN/COMMIT/ROLLBACK.
//!
//! # Architectural Boundaries
//!
//! - Only connection handling, statement execution and transactions belong
//!   here. Schema management and connection pooling do not.
//! - Failures surface as `false`/`None`/zero values; the cause is kept in
//!   [`DatabaseManager::last_error`].

pub mod config;
pub mod error;
mod executor;
mod manager;
pub mod param;
mod transaction;
pub mod value;

pub use config::{DbPath, ManagerConfig, TransactionBehavior};
pub use error::{DbError, DbResult};
pub use executor::{Database, StatementsCallback};
pub use manager::DatabaseManager;
pub use param::Parameter;
pub use transaction::Transaction;
pub use value::{ResultRow, Value};
