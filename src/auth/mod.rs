//! Authentication and authorization
//!
//! - `TokenAuthority`: issues tokens and tells admin callers from user callers
//! - `GrantChecker`: decides per table whether a caller may read it

pub mod grants;
pub mod token;

use thiserror::Error;

use crate::catalog::CatalogError;

pub use grants::GrantChecker;
pub use token::{generate_token, TokenAuthority, TokenClass};

/// Authorization errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// Caller may not read this table
    #[error("Access denied for table {table}")]
    AccessDenied { table: String },

    /// Underlying catalog failure
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The OS random source failed
    #[error("Token generation failed: {0}")]
    TokenGeneration(String),
}

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;
