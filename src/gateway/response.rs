//! Outbound status and envelopes

use serde::Serialize;

use crate::backend::Row;
use crate::catalog::TokenRecord;

/// Guidance attached to every failed data request
pub const DATA_ERROR_GUIDANCE: &str =
    "Make sure that request parameters are correct. If all is correct pls report bug on github.";

/// Outcome class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    ServerError,
    GatewayTimeout,
}

impl Status {
    /// Conventional numeric code
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::Conflict => 409,
            Status::ServerError => 500,
            Status::GatewayTimeout => 504,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// Response body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    /// `{"status": "success"}`
    Status { status: &'static str },
    /// `{"status": "failed", "error": ..}`
    Failed { status: &'static str, error: String },
    /// `{"data": [rows]}`
    Data { data: Vec<Row> },
    /// `{"status": "error", "server error": .., "message": ..}`
    DataError {
        status: &'static str,
        #[serde(rename = "server error")]
        server_error: String,
        message: &'static str,
    },
    /// `{"new_token": ..}`
    NewToken { new_token: String },
    Databases { databases: Vec<String> },
    Tables { tables: Vec<String> },
    Tokens { tokens: Vec<TokenRecord> },
    /// Bare JSON string
    Message(String),
}

impl Envelope {
    pub fn success() -> Self {
        Envelope::Status { status: "success" }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Envelope::Failed {
            status: "failed",
            error: error.into(),
        }
    }

    pub fn data_error(server_error: impl Into<String>) -> Self {
        Envelope::DataError {
            status: "error",
            server_error: server_error.into(),
            message: DATA_ERROR_GUIDANCE,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Envelope::Message(message.into())
    }
}

/// Status plus body, ready for the outer layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: Status,
    pub body: Envelope,
}

impl Response {
    pub fn new(status: Status, body: Envelope) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Envelope) -> Self {
        Self::new(Status::Ok, body)
    }

    /// Numeric status code
    pub fn code(&self) -> u16 {
        self.status.code()
    }
}
