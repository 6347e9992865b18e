//! Gateway orchestrator
//!
//! Composes the catalog, token authority, grant checker, relation extractor
//! and driver registry for each request. A data request moves through
//!
//! ```text
//! Validated → TokenChecked → TablesExtracted → Authorized → Executed → Responded
//! ```
//!
//! and may fail out of any state. The driver is reached only after every
//! referenced table passed the grant check. This is the only layer that turns
//! typed errors into a [`Status`] and [`Envelope`].

pub mod config;
pub mod error;
pub mod request;
pub mod response;

use std::sync::Arc;

use tokio::time::timeout;

use crate::auth::{GrantChecker, TokenAuthority};
use crate::backend::{AccessMode, BackendError, DriverRegistry, Row};
use crate::catalog::{Catalog, CatalogError, RefreshHandle, RefreshReport, RefreshTask, TokenRecord};
use crate::sql::extract_relations;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use request::{
    AdminRequest, DatabaseRequest, GatewayRequest, GetDataRequest, GrantRequest,
    InvalidRequest, IssueTokenRequest, RegisterDatabaseRequest,
};
pub use response::{Envelope, Response, Status, DATA_ERROR_GUIDANCE};

struct GatewayInner {
    catalog: Arc<Catalog>,
    tokens: TokenAuthority,
    grants: GrantChecker,
    registry: DriverRegistry,
    config: GatewayConfig,
}

/// Request handler shared by every connection
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Create a gateway over `catalog` dispatching through `registry`
    pub fn new(catalog: Arc<Catalog>, registry: DriverRegistry, config: GatewayConfig) -> Self {
        Gateway {
            inner: Arc::new(GatewayInner {
                tokens: TokenAuthority::new(catalog.clone()),
                grants: GrantChecker::new(catalog.clone()),
                catalog,
                registry,
                config,
            }),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.inner.catalog
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.inner.tokens
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Rescan every registered database now
    pub async fn refresh_tables(&self) -> RefreshReport {
        self.inner
            .catalog
            .refresh_tables(&self.inner.registry, self.inner.config.schema_timeout)
            .await
    }

    /// Start the periodic refresh task
    pub fn spawn_refresh(&self) -> RefreshHandle {
        RefreshTask::spawn(
            self.inner.catalog.clone(),
            self.inner.registry.clone(),
            self.inner.config.refresh_interval,
            self.inner.config.schema_timeout,
        )
    }

    /// Serve one request
    pub async fn handle(&self, request: GatewayRequest) -> Response {
        match request {
            GatewayRequest::GetData(req) => self.get_data(&req).await,
            GatewayRequest::GrantTableAccess(req) => self.grant_table_access(&req).await,
            GatewayRequest::GenerateAdminToken(req) => self.generate_token(&req, true).await,
            GatewayRequest::GenerateUserToken(req) => self.generate_token(&req, false).await,
            GatewayRequest::ListUserTokens(req) => self.list_user_tokens(&req),
            GatewayRequest::RegisterDatabase(req) => self.register_database(&req).await,
            GatewayRequest::RemoveDatabase(req) => self.remove_database(&req),
            GatewayRequest::ListDatabases(req) => self.list_databases(&req),
            GatewayRequest::ListTables(req) => self.list_tables(&req),
        }
    }

    // ============ Data ============

    /// Authorize and run a query
    pub async fn get_data(&self, req: &GetDataRequest) -> Response {
        match self.try_get_data(req).await {
            Ok(rows) => {
                tracing::info!(database = %req.database, rows = rows.len(), "get_data succeeded");
                Response::ok(Envelope::Data { data: rows })
            }
            Err(e) => {
                tracing::info!(database = %req.database, error = %e, "get_data failed");
                e.into_response()
            }
        }
    }

    async fn try_get_data(&self, req: &GetDataRequest) -> GatewayResult<Vec<Row>> {
        req.validate()?;

        let caller = self
            .inner
            .catalog
            .token(&req.token)
            .ok_or(GatewayError::UnknownToken)?;

        let def = self.inner.catalog.database(&req.database)?;

        // Dialect and identifier rules follow the target engine
        let relations = extract_relations(&req.query, def.engine, &def.params.database)?;
        if !relations.read_only && !self.inner.config.allow_writes {
            return Err(GatewayError::WriteRefused);
        }

        self.inner
            .grants
            .check_all(&req.token, &def.name, &relations.tables)?;

        tracing::debug!(
            caller = %caller.name,
            database = %def.name,
            tables = relations.tables.len(),
            "Query authorized"
        );

        let mode = if relations.read_only {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        };
        let driver = self.inner.registry.resolve(def.engine)?;
        let query_timeout = self.inner.config.query_timeout;
        let rows = timeout(query_timeout, driver.execute(&req.query, &def.params, mode))
            .await
            .map_err(|_| BackendError::Timeout(query_timeout))??;
        Ok(rows)
    }

    // ============ Grants and tokens ============

    /// Grant a user token access to one table
    pub async fn grant_table_access(&self, req: &GrantRequest) -> Response {
        let result = async {
            req.validate()?;
            self.require_admin(&req.admin_token)?;
            self.inner
                .catalog
                .grant_table_access(&req.user_token, &req.database, &req.table)
                .await?;
            GatewayResult::Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                tracing::info!(database = %req.database, table = %req.table, "grant_table_access succeeded");
                Response::ok(Envelope::success())
            }
            Err(e) => {
                tracing::info!(database = %req.database, table = %req.table, error = %e, "grant_table_access failed");
                e.into_grant_response()
            }
        }
    }

    async fn generate_token(&self, req: &IssueTokenRequest, admin: bool) -> Response {
        let result = async {
            req.validate()?;
            self.require_admin(&req.admin_token)?;
            let token = if admin {
                self.inner
                    .tokens
                    .issue_admin_token(&req.name, req.description.clone())
                    .await?
            } else {
                self.inner
                    .tokens
                    .issue_user_token(&req.name, req.description.clone())
                    .await?
            };
            GatewayResult::Ok(token)
        }
        .await;

        respond(result, |new_token| Envelope::NewToken { new_token })
    }

    fn list_user_tokens(&self, req: &AdminRequest) -> Response {
        let result = req
            .validate()
            .map_err(GatewayError::from)
            .and_then(|()| self.require_admin(&req.admin_token))
            .map(|_| self.inner.catalog.list_tokens(false));

        respond(result, |tokens| Envelope::Tokens { tokens })
    }

    // ============ Databases ============

    async fn register_database(&self, req: &RegisterDatabaseRequest) -> Response {
        let result = async {
            req.validate()?;
            self.require_admin(&req.admin_token)?;
            self.inner.catalog.register_database(req.database.clone())?;

            // Registration stands even if the first scan fails; the next refresh retries
            let name = &req.database.name;
            match self
                .inner
                .catalog
                .refresh_database(name, &self.inner.registry, self.inner.config.schema_timeout)
                .await
            {
                Ok(tables) => tracing::info!(database = %name, tables, "Initial schema scan done"),
                Err(e) => tracing::warn!(database = %name, error = %e, "Initial schema scan failed"),
            }
            GatewayResult::Ok(())
        }
        .await;

        respond(result, |()| Envelope::success())
    }

    fn remove_database(&self, req: &DatabaseRequest) -> Response {
        let result = req
            .validate()
            .map_err(GatewayError::from)
            .and_then(|()| self.require_admin(&req.admin_token))
            .and_then(|_| {
                self.inner
                    .catalog
                    .remove_database(&req.database)
                    .map_err(GatewayError::from)
            });

        respond(result, |_| Envelope::success())
    }

    fn list_databases(&self, req: &AdminRequest) -> Response {
        let result = req
            .validate()
            .map_err(GatewayError::from)
            .and_then(|()| self.require_admin(&req.admin_token))
            .map(|_| self.inner.catalog.list_databases());

        respond(result, |databases| Envelope::Databases { databases })
    }

    fn list_tables(&self, req: &DatabaseRequest) -> Response {
        let result = req
            .validate()
            .map_err(GatewayError::from)
            .and_then(|()| self.require_admin(&req.admin_token))
            .and_then(|_| {
                self.inner
                    .catalog
                    .list_tables(&req.database)
                    .map_err(GatewayError::from)
            });

        respond(result, |tables| Envelope::Tables { tables })
    }

    fn require_admin(&self, token: &str) -> GatewayResult<TokenRecord> {
        match self.inner.catalog.token(token) {
            Some(record) if record.admin => Ok(record),
            _ => Err(GatewayError::NotAdmin),
        }
    }
}

fn respond<T>(result: GatewayResult<T>, body: impl FnOnce(T) -> Envelope) -> Response {
    match result {
        Ok(value) => Response::ok(body(value)),
        Err(e) => {
            if matches!(e, GatewayError::Catalog(CatalogError::Store(_))) {
                tracing::error!(error = %e, "Grant store failure");
            }
            e.into_response()
        }
    }
}
