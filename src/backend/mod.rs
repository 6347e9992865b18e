//! Backend dispatch
//!
//! Every supported database engine is reached through a [`Driver`]. The
//! [`DriverRegistry`] maps an engine tag to its driver, so adding a backend
//! means adding one driver and registering it; nothing above this layer
//! changes.
//!
//! A driver offers two capabilities:
//! - `execute`: run an already-authorized query and return normalized rows.
//!   In [`AccessMode::ReadOnly`] the backend session itself refuses writes.
//! - `list_tables`: report the live table set (the schema source for refresh)

pub mod error;
pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod value;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use error::{BackendError, BackendResult};
pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
pub use value::{Row, Value};

/// Connections kept per cached pool
pub(crate) const POOL_MAX_CONNECTIONS: u32 = 8;

/// Database engine tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// MySQL / MariaDB
    #[serde(alias = "mariadb")]
    MySql,
    /// PostgreSQL
    #[serde(alias = "postgresql")]
    Postgres,
    /// SQLite database file
    Sqlite,
}

impl EngineType {
    /// All known engine tags
    pub const ALL: [EngineType; 3] = [EngineType::MySql, EngineType::Postgres, EngineType::Sqlite];

    /// Tag as written in configuration and requests
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::MySql => "mysql",
            EngineType::Postgres => "postgres",
            EngineType::Sqlite => "sqlite",
        }
    }

    /// Whether table names compare case-insensitively on this engine
    pub fn case_insensitive_tables(&self) -> bool {
        matches!(self, EngineType::Sqlite)
    }

    /// Canonical catalog form of a table name reported by, or requested for, this engine
    pub fn canonical_table_name(&self, name: &str) -> String {
        if self.case_insensitive_tables() {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(EngineType::MySql),
            "postgres" | "postgresql" => Ok(EngineType::Postgres),
            "sqlite" => Ok(EngineType::Sqlite),
            other => Err(format!("unknown engine type '{}'", other)),
        }
    }
}

/// How to reach one registered database
///
/// For SQLite, `database` is the path of the database file and the network
/// fields are ignored.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
}

impl ConnectionParams {
    /// Parameters naming only a database (or SQLite file)
    pub fn database(database: impl Into<String>) -> Self {
        ConnectionParams {
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set host and port
    #[must_use]
    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// Set credentials
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub(crate) fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or("127.0.0.1")
    }
}

// Passwords never reach logs
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

/// Session access a query runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Read-only transaction or connection; the backend rejects any write
    ReadOnly,
    /// Unrestricted session, used only when writes are enabled
    ReadWrite,
}

/// Engine-specific adapter
#[async_trait]
pub trait Driver: Send + Sync {
    /// Execute an already-authorized query and return its rows in order
    async fn execute(
        &self,
        query: &str,
        params: &ConnectionParams,
        mode: AccessMode,
    ) -> BackendResult<Vec<Row>>;

    /// List the tables currently present in the database
    async fn list_tables(&self, params: &ConnectionParams) -> BackendResult<Vec<String>>;
}

/// Drivers keyed by engine tag
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<EngineType, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in MySQL, PostgreSQL and SQLite drivers
    pub fn with_default_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(EngineType::MySql, Arc::new(MySqlDriver::new()));
        registry.register(EngineType::Postgres, Arc::new(PostgresDriver::new()));
        registry.register(EngineType::Sqlite, Arc::new(SqliteDriver::new()));
        registry
    }

    /// Register (or replace) the driver for an engine
    pub fn register(&mut self, engine: EngineType, driver: Arc<dyn Driver>) {
        self.drivers.insert(engine, driver);
    }

    /// Builder-style register
    #[must_use]
    pub fn with_driver(mut self, engine: EngineType, driver: Arc<dyn Driver>) -> Self {
        self.register(engine, driver);
        self
    }

    /// Select the driver for an engine
    pub fn resolve(&self, engine: EngineType) -> BackendResult<Arc<dyn Driver>> {
        self.drivers
            .get(&engine)
            .cloned()
            .ok_or(BackendError::UnsupportedEngine(engine))
    }

    /// Engines with a registered driver, sorted
    pub fn engines(&self) -> Vec<EngineType> {
        let mut engines: Vec<_> = self.drivers.keys().copied().collect();
        engines.sort();
        engines
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("engines", &self.engines())
            .finish()
    }
}

/// One connection pool per distinct set of connection parameters
pub(crate) struct PoolCache<P> {
    pools: Mutex<HashMap<ConnectionParams, P>>,
}

impl<P: Clone> PoolCache<P> {
    pub(crate) fn new() -> Self {
        PoolCache {
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached pool, opening it with `open` on first use
    pub(crate) fn get_or_open(
        &self,
        params: &ConnectionParams,
        open: impl FnOnce(&ConnectionParams) -> BackendResult<P>,
    ) -> BackendResult<P> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(params) {
            return Ok(pool.clone());
        }
        let pool = open(params)?;
        pools.insert(params.clone(), pool.clone());
        Ok(pool)
    }

    pub(crate) fn len(&self) -> usize {
        self.pools.lock().len()
    }
}
