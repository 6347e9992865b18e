//! First-time initialization for tablegate
//!
//! Handles environment variable-based bootstrap for container deployments.
//!
//! Environment Variables:
//! - `TABLEGATE_BOOTSTRAP_ADMIN` - Name of an admin token to issue when no admin token exists
//! - `TABLEGATE_TEST_ADMIN_TOKEN` - Fixed admin token to install (test deployments)
//! - `TABLEGATE_TEST_ADMIN_TOKEN_FILE` - Read the fixed admin token from file (Docker secrets)

use std::env;
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::{error, info};

use crate::auth::{AuthError, TokenAuthority};
use crate::catalog::{Catalog, CatalogError, DatabaseDef};

/// Name recorded for the fixed test admin token
pub const TEST_ADMIN_NAME: &str = "test admin";

/// Initialization errors
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid database file {path}: {source}")]
    DatabaseFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Result of initialization
#[derive(Debug, PartialEq, Eq)]
pub enum InitResult {
    /// Nothing to do
    AlreadyInitialized,
    /// Tokens were installed; `issued` holds a freshly generated admin token
    Initialized { issued: Option<String> },
    /// Initialization failed
    Failed(String),
}

/// Configuration from environment variables
#[derive(Debug, Default)]
pub struct InitConfig {
    pub bootstrap_admin: Option<String>,
    pub test_admin_token: Option<String>,
    pub test_admin_token_file: Option<String>,
}

impl InitConfig {
    /// Read configuration from environment variables
    pub fn from_env() -> Self {
        InitConfig {
            bootstrap_admin: env::var("TABLEGATE_BOOTSTRAP_ADMIN").ok(),
            test_admin_token: env::var("TABLEGATE_TEST_ADMIN_TOKEN").ok(),
            test_admin_token_file: env::var("TABLEGATE_TEST_ADMIN_TOKEN_FILE").ok(),
        }
    }

    /// Determine the fixed test admin token, if one is configured
    pub fn determine_test_token(&self) -> Result<Option<String>, InitError> {
        // Priority: direct token > file
        let token = if let Some(ref token) = self.test_admin_token {
            token.trim().to_string()
        } else if let Some(ref file_path) = self.test_admin_token_file {
            fs::read_to_string(file_path)?.trim().to_string()
        } else {
            return Ok(None);
        };

        if token.is_empty() {
            return Err(InitError::Config(
                "TABLEGATE_TEST_ADMIN_TOKEN is set but empty".to_string(),
            ));
        }
        Ok(Some(token))
    }
}

/// Install configured tokens
async fn initialize_tokens(
    config: &InitConfig,
    catalog: &Catalog,
    tokens: &TokenAuthority,
) -> Result<InitResult, InitError> {
    let mut changed = false;

    if let Some(token) = config.determine_test_token()? {
        if catalog.contains_token(&token) {
            info!("Test admin token already installed");
        } else {
            tokens
                .install_token(&token, TEST_ADMIN_NAME, true, None)
                .await?;
            info!("Installed test admin token");
            changed = true;
        }
    }

    let mut issued = None;
    if let Some(name) = config.bootstrap_admin.as_deref() {
        if catalog.has_admin_token() {
            info!("Admin token exists, skipping bootstrap");
        } else {
            let token = tokens
                .issue_admin_token(name, Some("bootstrap".to_string()))
                .await?;
            info!(name, "Issued bootstrap admin token");
            issued = Some(token);
            changed = true;
        }
    }

    Ok(if changed {
        InitResult::Initialized { issued }
    } else {
        InitResult::AlreadyInitialized
    })
}

/// Perform first-time initialization if needed
pub async fn maybe_initialize(
    config: &InitConfig,
    catalog: &Catalog,
    tokens: &TokenAuthority,
) -> InitResult {
    match initialize_tokens(config, catalog, tokens).await {
        Ok(result) => result,
        Err(e) => {
            error!("Failed to initialize tokens: {}", e);
            InitResult::Failed(e.to_string())
        }
    }
}

/// Read database definitions from a JSON file holding an array of them
pub fn load_database_file(path: &Path) -> Result<Vec<DatabaseDef>, InitError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| InitError::DatabaseFile {
        path: path.display().to_string(),
        source,
    })
}
