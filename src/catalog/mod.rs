//! Catalog - registered databases, their tables, tokens and grants
//!
//! Databases are registered at runtime and their table sets are discovered by
//! scanning the live schema (see [`refresh`]). Tokens and grants are durable:
//! they are written to the grant store before they become visible and are
//! replayed from it when the catalog opens.
//!
//! In-memory state sits behind `parking_lot` locks that are never held across
//! an `.await`. Token and grant mutations are additionally serialized by an
//! async mutex, so each check → persist → publish sequence is atomic with
//! respect to other mutations while readers never wait on it.

pub mod error;
pub mod refresh;
pub mod store;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::{ConnectionParams, EngineType};

pub use error::{CatalogError, CatalogResult};
pub use refresh::{RefreshHandle, RefreshReport, RefreshTask};
pub use store::{FileStore, GrantStore, MemoryStore, StoreError, StoreRecord};

/// A registered database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDef {
    /// Name callers use to address the database
    pub name: String,
    /// Engine tag selecting the driver
    pub engine: EngineType,
    /// How to reach it
    #[serde(default)]
    pub params: ConnectionParams,
}

impl DatabaseDef {
    /// Create a new database definition
    pub fn new(name: impl Into<String>, engine: EngineType, params: ConnectionParams) -> Self {
        Self {
            name: name.into(),
            engine,
            params,
        }
    }
}

/// An issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub name: String,
    pub admin: bool,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Create a record stamped with the current time
    pub fn new(
        token: impl Into<String>,
        name: impl Into<String>,
        admin: bool,
        description: Option<String>,
    ) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            admin,
            description,
            created_at: Utc::now(),
        }
    }
}

/// Permission for one token to read one table of one database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub token: String,
    pub database: String,
    pub table: String,
}

impl Grant {
    pub fn new(
        token: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            database: database.into(),
            table: table.into(),
        }
    }
}

struct DatabaseEntry {
    def: Arc<DatabaseDef>,
    /// Replaced wholesale on refresh, never mutated in place
    tables: Arc<BTreeSet<String>>,
}

/// In-memory catalog backed by a grant store
pub struct Catalog {
    databases: RwLock<BTreeMap<String, DatabaseEntry>>,
    tokens: RwLock<HashMap<String, TokenRecord>>,
    grants: RwLock<HashSet<Grant>>,
    mutation: tokio::sync::Mutex<()>,
    store: Arc<dyn GrantStore>,
}

impl Catalog {
    /// Open a catalog, replaying tokens and grants from `store`
    pub async fn open(store: Arc<dyn GrantStore>) -> CatalogResult<Self> {
        let mut tokens = HashMap::new();
        let mut grants = HashSet::new();
        for record in store.load().await? {
            match record {
                StoreRecord::Token(token) => {
                    tokens.insert(token.token.clone(), token);
                }
                StoreRecord::Grant(grant) => {
                    grants.insert(grant);
                }
            }
        }

        tracing::info!(
            tokens = tokens.len(),
            grants = grants.len(),
            "Catalog opened"
        );

        Ok(Catalog {
            databases: RwLock::new(BTreeMap::new()),
            tokens: RwLock::new(tokens),
            grants: RwLock::new(grants),
            mutation: tokio::sync::Mutex::new(()),
            store,
        })
    }

    /// Catalog over an empty in-memory store
    pub fn in_memory() -> Self {
        Catalog {
            databases: RwLock::new(BTreeMap::new()),
            tokens: RwLock::new(HashMap::new()),
            grants: RwLock::new(HashSet::new()),
            mutation: tokio::sync::Mutex::new(()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    // ============ Databases ============

    /// Register a database. Its table set starts empty until it is scanned.
    pub fn register_database(&self, def: DatabaseDef) -> CatalogResult<()> {
        let mut databases = self.databases.write();
        if databases.contains_key(&def.name) {
            return Err(CatalogError::DuplicateDatabase(def.name));
        }
        tracing::info!(database = %def.name, engine = %def.engine, "Registered database");
        databases.insert(
            def.name.clone(),
            DatabaseEntry {
                def: Arc::new(def),
                tables: Arc::new(BTreeSet::new()),
            },
        );
        Ok(())
    }

    /// Remove a database. Grants naming it stay in the grant store.
    pub fn remove_database(&self, name: &str) -> CatalogResult<DatabaseDef> {
        let entry = self
            .databases
            .write()
            .remove(name)
            .ok_or_else(|| CatalogError::DatabaseNotFound(name.to_string()))?;
        tracing::info!(database = %name, "Removed database");
        Ok(Arc::unwrap_or_clone(entry.def))
    }

    /// Definition of a registered database
    pub fn database(&self, name: &str) -> CatalogResult<Arc<DatabaseDef>> {
        self.databases
            .read()
            .get(name)
            .map(|entry| entry.def.clone())
            .ok_or_else(|| CatalogError::DatabaseNotFound(name.to_string()))
    }

    /// Names of all registered databases, sorted
    pub fn list_databases(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    /// Current table set of a database
    pub fn tables(&self, database: &str) -> CatalogResult<Arc<BTreeSet<String>>> {
        self.databases
            .read()
            .get(database)
            .map(|entry| entry.tables.clone())
            .ok_or_else(|| CatalogError::DatabaseNotFound(database.to_string()))
    }

    /// Table names of a database, sorted
    pub fn list_tables(&self, database: &str) -> CatalogResult<Vec<String>> {
        Ok(self.tables(database)?.iter().cloned().collect())
    }

    /// Swap in a freshly scanned table set
    ///
    /// Only applies if `def` is still the registered definition, so a scan
    /// that raced with removal or re-registration is dropped.
    pub(crate) fn replace_tables(&self, def: &Arc<DatabaseDef>, tables: BTreeSet<String>) -> bool {
        let mut databases = self.databases.write();
        match databases.get_mut(&def.name) {
            Some(entry) if Arc::ptr_eq(&entry.def, def) => {
                entry.tables = Arc::new(tables);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn database_defs(&self) -> Vec<Arc<DatabaseDef>> {
        self.databases
            .read()
            .values()
            .map(|entry| entry.def.clone())
            .collect()
    }

    // ============ Tokens ============

    /// Persist and publish a new token
    pub async fn add_token(&self, record: TokenRecord) -> CatalogResult<()> {
        let _guard = self.mutation.lock().await;
        if self.tokens.read().contains_key(&record.token) {
            return Err(CatalogError::DuplicateToken);
        }

        self.store.append(&StoreRecord::Token(record.clone())).await?;

        tracing::info!(name = %record.name, admin = record.admin, "Token issued");
        self.tokens.write().insert(record.token.clone(), record);
        Ok(())
    }

    /// Look up a token
    pub fn token(&self, token: &str) -> Option<TokenRecord> {
        self.tokens.read().get(token).cloned()
    }

    /// Check whether a token was issued
    pub fn contains_token(&self, token: &str) -> bool {
        self.tokens.read().contains_key(token)
    }

    /// Admin (`admin = true`) or user tokens, oldest first
    pub fn list_tokens(&self, admin: bool) -> Vec<TokenRecord> {
        let mut tokens: Vec<_> = self
            .tokens
            .read()
            .values()
            .filter(|record| record.admin == admin)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        tokens
    }

    /// Check whether any admin token exists
    pub fn has_admin_token(&self) -> bool {
        self.tokens.read().values().any(|record| record.admin)
    }

    // ============ Grants ============

    /// Grant `token` access to one table
    ///
    /// The table must be in the database's current table set. The grant is
    /// persisted before it is published, so a store failure leaves no trace.
    pub async fn grant_table_access(
        &self,
        token: &str,
        database: &str,
        table: &str,
    ) -> CatalogResult<()> {
        let _guard = self.mutation.lock().await;

        let grant = {
            if !self.tokens.read().contains_key(token) {
                return Err(CatalogError::TokenNotFound);
            }
            let databases = self.databases.read();
            let entry = databases
                .get(database)
                .ok_or_else(|| CatalogError::DatabaseNotFound(database.to_string()))?;
            let table = entry.def.engine.canonical_table_name(table);
            if !entry.tables.contains(&table) {
                return Err(CatalogError::TableNotFound {
                    database: database.to_string(),
                    table,
                });
            }
            Grant::new(token, database, table)
        };

        if self.grants.read().contains(&grant) {
            return Err(CatalogError::AccessAlreadyGranted {
                database: grant.database,
                table: grant.table,
            });
        }

        self.store.append(&StoreRecord::Grant(grant.clone())).await?;

        tracing::info!(database = %grant.database, table = %grant.table, "Table access granted");
        self.grants.write().insert(grant);
        Ok(())
    }

    /// Check whether `token` may read `table` of `database`
    ///
    /// Admin tokens may read everything; unknown tokens nothing.
    pub fn has_access(&self, token: &str, database: &str, table: &str) -> bool {
        match self.tokens.read().get(token) {
            None => return false,
            Some(record) if record.admin => return true,
            Some(_) => {}
        }

        let table = match self.databases.read().get(database) {
            Some(entry) => entry.def.engine.canonical_table_name(table),
            None => table.to_string(),
        };
        self.grants
            .read()
            .contains(&Grant::new(token, database, table))
    }

    /// Tables of `database` granted to `token`, sorted
    pub fn granted_tables(&self, token: &str, database: &str) -> Vec<String> {
        let tables: BTreeSet<String> = self
            .grants
            .read()
            .iter()
            .filter(|grant| grant.token == token && grant.database == database)
            .map(|grant| grant.table.clone())
            .collect();
        tables.into_iter().collect()
    }
}
