//! Gateway error type and its translation to responses

use thiserror::Error;

use super::request::InvalidRequest;
use super::response::{Envelope, Response, Status};
use crate::auth::AuthError;
use crate::backend::BackendError;
use crate::catalog::CatalogError;
use crate::sql::SqlError;

/// Every way a request can fail
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Invalid(#[from] InvalidRequest),

    /// Token was never issued
    #[error("Access denied.")]
    UnknownToken,

    /// Admin operation without an admin token
    #[error("Access denied")]
    NotAdmin,

    /// Statement is not a plain read and writes are disabled
    #[error("Only read-only statements are allowed")]
    WriteRefused,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

fn catalog_status(err: &CatalogError) -> Status {
    if err.is_not_found() {
        Status::NotFound
    } else if err.is_conflict() {
        Status::Conflict
    } else {
        Status::ServerError
    }
}

impl GatewayError {
    /// Status class of this failure
    pub fn status(&self) -> Status {
        match self {
            GatewayError::Invalid(_) | GatewayError::WriteRefused | GatewayError::Sql(_) => {
                Status::BadRequest
            }
            GatewayError::UnknownToken => Status::NotFound,
            GatewayError::NotAdmin => Status::Forbidden,
            GatewayError::Catalog(e) | GatewayError::Auth(AuthError::Catalog(e)) => {
                catalog_status(e)
            }
            GatewayError::Auth(AuthError::AccessDenied { .. }) => Status::Forbidden,
            GatewayError::Auth(AuthError::TokenGeneration(_)) => Status::ServerError,
            GatewayError::Backend(BackendError::Timeout(_)) => Status::GatewayTimeout,
            GatewayError::Backend(_) => Status::ServerError,
        }
    }

    /// Response for a data request or a plain admin operation
    pub fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            // Driver message is surfaced as-is
            GatewayError::Backend(e) => Envelope::data_error(e.to_string()),
            other => Envelope::message(other.to_string()),
        };
        Response::new(status, body)
    }

    /// Response for a grant request: catalog outcomes use the failed envelope
    pub fn into_grant_response(self) -> Response {
        match self {
            GatewayError::Catalog(e) => {
                Response::new(catalog_status(&e), Envelope::failed(e.to_string()))
            }
            other => other.into_response(),
        }
    }
}
