//! Backend error types

use std::time::Duration;

use thiserror::Error;

use super::EngineType;

/// Backend dispatch and driver errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// No driver is registered for the engine tag
    #[error("No driver registered for engine '{0}'")]
    UnsupportedEngine(EngineType),

    /// The driver failed; carries the driver's own message
    #[error("{0}")]
    Execution(String),

    /// The backend did not answer in time
    #[error("Backend did not respond within {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        BackendError::Execution(err.to_string())
    }
}

impl From<mysql_async::Error> for BackendError {
    fn from(err: mysql_async::Error) -> Self {
        BackendError::Execution(err.to_string())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;
