//! Inbound request descriptors
//!
//! One variant per operation, tagged by `op`:
//! ```text
//! {"op":"get_data","token":"..","database":"shop","query":"SELECT * FROM orders"}
//! {"op":"grant_table_access","admin_token":"..","user_token":"..","database":"shop","table":"orders"}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::DatabaseDef;

/// A required field is missing or blank
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Bad request: field '{0}' is required")]
pub struct InvalidRequest(pub &'static str);

fn require(field: &'static str, value: &str) -> Result<(), InvalidRequest> {
    if value.trim().is_empty() {
        Err(InvalidRequest(field))
    } else {
        Ok(())
    }
}

/// Run a query against a registered database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetDataRequest {
    pub token: String,
    pub database: String,
    pub query: String,
}

impl GetDataRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        require("token", &self.token)?;
        require("database", &self.database)?;
        require("query", &self.query)
    }
}

/// Grant a user token read access to one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantRequest {
    pub admin_token: String,
    pub user_token: String,
    pub database: String,
    pub table: String,
}

impl GrantRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        require("admin_token", &self.admin_token)?;
        require("user_token", &self.user_token)?;
        require("database", &self.database)?;
        require("table", &self.table)
    }
}

/// Issue a new token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueTokenRequest {
    pub admin_token: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl IssueTokenRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        require("admin_token", &self.admin_token)?;
        require("name", &self.name)
    }
}

/// Admin operation without arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminRequest {
    pub admin_token: String,
}

impl AdminRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        require("admin_token", &self.admin_token)
    }
}

/// Admin operation on one database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRequest {
    pub admin_token: String,
    pub database: String,
}

impl DatabaseRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        require("admin_token", &self.admin_token)?;
        require("database", &self.database)
    }
}

/// Register a database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDatabaseRequest {
    pub admin_token: String,
    pub database: DatabaseDef,
}

impl RegisterDatabaseRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        require("admin_token", &self.admin_token)?;
        require("database.name", &self.database.name)?;
        require("database.params.database", &self.database.params.database)
    }
}

/// Every operation the gateway serves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatewayRequest {
    GetData(GetDataRequest),
    GrantTableAccess(GrantRequest),
    GenerateAdminToken(IssueTokenRequest),
    GenerateUserToken(IssueTokenRequest),
    ListUserTokens(AdminRequest),
    RegisterDatabase(RegisterDatabaseRequest),
    RemoveDatabase(DatabaseRequest),
    ListDatabases(AdminRequest),
    ListTables(DatabaseRequest),
}

impl GatewayRequest {
    /// Operation name, as tagged on the wire
    pub fn op(&self) -> &'static str {
        match self {
            GatewayRequest::GetData(_) => "get_data",
            GatewayRequest::GrantTableAccess(_) => "grant_table_access",
            GatewayRequest::GenerateAdminToken(_) => "generate_admin_token",
            GatewayRequest::GenerateUserToken(_) => "generate_user_token",
            GatewayRequest::ListUserTokens(_) => "list_user_tokens",
            GatewayRequest::RegisterDatabase(_) => "register_database",
            GatewayRequest::RemoveDatabase(_) => "remove_database",
            GatewayRequest::ListDatabases(_) => "list_databases",
            GatewayRequest::ListTables(_) => "list_tables",
        }
    }

    /// Check that every required field is present
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        match self {
            GatewayRequest::GetData(req) => req.validate(),
            GatewayRequest::GrantTableAccess(req) => req.validate(),
            GatewayRequest::GenerateAdminToken(req) | GatewayRequest::GenerateUserToken(req) => {
                req.validate()
            }
            GatewayRequest::ListUserTokens(req) | GatewayRequest::ListDatabases(req) => {
                req.validate()
            }
            GatewayRequest::RegisterDatabase(req) => req.validate(),
            GatewayRequest::RemoveDatabase(req) | GatewayRequest::ListTables(req) => req.validate(),
        }
    }
}
