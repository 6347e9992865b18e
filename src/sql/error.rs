//! SQL error types

use thiserror::Error;

/// SQL error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SqlError {
    /// Parse error from sqlparser, or not exactly one statement
    #[error("Parse error: {0}")]
    Parse(String),

    /// Construct whose relations cannot be determined
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<sqlparser::parser::ParserError> for SqlError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        SqlError::Parse(err.to_string())
    }
}

/// Result type for SQL operations
pub type SqlResult<T> = Result<T, SqlError>;
