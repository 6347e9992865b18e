//! Catalog error types

use thiserror::Error;

use crate::backend::BackendError;
use crate::catalog::store::StoreError;

/// Catalog operation errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A database with this name is already registered
    #[error("Database {0} already registered.")]
    DuplicateDatabase(String),

    /// No database with this name is registered
    #[error("Database {0} not found.")]
    DatabaseNotFound(String),

    /// Token string already issued
    #[error("Token already exists.")]
    DuplicateToken,

    /// Token string never issued
    #[error("Token not found.")]
    TokenNotFound,

    /// Table absent from the database's current table set
    #[error("Table {table} not found in database {database}.")]
    TableNotFound { database: String, table: String },

    /// Grant already recorded
    #[error("Access to table {table} already granted.")]
    AccessAlreadyGranted { database: String, table: String },

    /// Live schema could not be read
    #[error("Schema scan of database {database} failed: {source}")]
    SchemaScan {
        database: String,
        #[source]
        source: BackendError,
    },

    /// Grant store failure
    #[error("Grant store error: {0}")]
    Store(#[from] StoreError),
}

impl CatalogError {
    /// True for errors that name something missing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatalogError::DatabaseNotFound(_)
                | CatalogError::TokenNotFound
                | CatalogError::TableNotFound { .. }
        )
    }

    /// True for errors caused by something already existing
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CatalogError::DuplicateDatabase(_)
                | CatalogError::DuplicateToken
                | CatalogError::AccessAlreadyGranted { .. }
        )
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;
