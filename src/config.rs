//! Manager configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// SQLite's in-memory path sentinel.
pub const MEMORY_PATH: &str = ":memory:";

/// Where the backing store lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbPath {
    /// A database file, created on open if missing.
    File(PathBuf),
    /// A private in-memory database.
    Memory,
}

impl From<&str> for DbPath {
    fn from(path: &str) -> Self {
        if path == MEMORY_PATH {
            DbPath::Memory
        } else {
            DbPath::File(PathBuf::from(path))
        }
    }
}

impl From<&Path> for DbPath {
    fn from(path: &Path) -> Self {
        DbPath::File(path.to_path_buf())
    }
}

impl From<PathBuf> for DbPath {
    fn from(path: PathBuf) -> Self {
        DbPath::File(path)
    }
}

impl fmt::Display for DbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbPath::File(path) => write!(f, "{}", path.display()),
            DbPath::Memory => f.write_str(MEMORY_PATH),
        }
    }
}

/// Locking mode used by `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionBehavior {
    Deferred,
    Immediate,
    #[default]
    Exclusive,
}

impl TransactionBehavior {
    pub(crate) fn begin_sql(self) -> &'static str {
        match self {
            TransactionBehavior::Deferred => "BEGIN DEFERRED",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Database manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Path to the SQLite database file, or the in-memory sentinel
    pub db_path: DbPath,
    /// How long the engine retries on a locked database before giving up
    #[serde(default, with = "optional_millis")]
    pub busy_timeout: Option<Duration>,
    /// Locking mode for transactions
    #[serde(default)]
    pub transaction_behavior: TransactionBehavior,
    /// Statements run once, right after the connection opens
    #[serde(default)]
    pub pragmas: Vec<String>,
}

impl ManagerConfig {
    /// Create a config for the given store path
    pub fn new(db_path: impl Into<DbPath>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout: None,
            transaction_behavior: TransactionBehavior::default(),
            pragmas: Vec::new(),
        }
    }

    /// Create a config for a private in-memory store
    pub fn in_memory() -> Self {
        Self::new(DbPath::Memory)
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    pub fn with_transaction_behavior(mut self, behavior: TransactionBehavior) -> Self {
        self.transaction_behavior = behavior;
        self
    }

    pub fn with_pragma(mut self, statement: impl Into<String>) -> Self {
        self.pragmas.push(statement.into());
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sentinel_parses() {
        assert_eq!(DbPath::from(":memory:"), DbPath::Memory);
        assert_eq!(
            DbPath::from("/tmp/app.db"),
            DbPath::File(PathBuf::from("/tmp/app.db"))
        );
        assert_eq!(DbPath::Memory.to_string(), ":memory:");
    }

    #[test]
    fn builder_sets_fields() {
        let config = ManagerConfig::new("data.db")
            .with_busy_timeout(Duration::from_millis(250))
            .with_transaction_behavior(TransactionBehavior::Immediate)
            .with_pragma("PRAGMA foreign_keys = ON");
        assert_eq!(config.busy_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.transaction_behavior.begin_sql(), "BEGIN IMMEDIATE");
        assert_eq!(config.pragmas.len(), 1);
    }

    #[test]
    fn config_round_trips_through_json() {
        let json = serde_json::json!({
            "db_path": { "file": "/var/lib/app/app.db" },
            "busy_timeout": 250,
            "transaction_behavior": "immediate",
            "pragmas": ["PRAGMA foreign_keys = ON"]
        });
        let config: ManagerConfig = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(config.db_path, DbPath::File(PathBuf::from("/var/lib/app/app.db")));
        assert_eq!(config.busy_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.transaction_behavior, TransactionBehavior::Immediate);
        assert_eq!(config.pragmas, ["PRAGMA foreign_keys = ON"]);
        assert_eq!(serde_json::to_value(&config).unwrap(), json);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: ManagerConfig =
            serde_json::from_value(serde_json::json!({ "db_path": "memory" })).unwrap();
        assert_eq!(config, ManagerConfig::in_memory());
        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["busy_timeout"], serde_json::Value::Null);
    }

    #[test]
    fn defaults_to_exclusive_in_memory() {
        let config = ManagerConfig::default();
        assert_eq!(config.db_path, DbPath::Memory);
        assert_eq!(config.transaction_behavior, TransactionBehavior::Exclusive);
    }
}
