//! Token issuing and classification

use std::fmt::Write as _;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;

use super::{AuthError, AuthResult};
use crate::catalog::{Catalog, CatalogError, TokenRecord};

/// Random bytes per token (64 hex characters)
pub const TOKEN_BYTES: usize = 32;

/// Attempts before a token collision is reported
const ISSUE_ATTEMPTS: usize = 3;

/// What a presented token is allowed to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    /// May administer the gateway and read every table
    Admin,
    /// May read granted tables only
    User,
    /// Never issued
    Unknown,
}

/// Generate a fresh hex-encoded token from the OS CSPRNG
pub fn generate_token() -> AuthResult<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::TokenGeneration(e.to_string()))?;

    let mut token = String::with_capacity(TOKEN_BYTES * 2);
    for byte in bytes {
        let _ = write!(token, "{:02x}", byte);
    }
    Ok(token)
}

/// Issues tokens into the catalog and classifies presented tokens
#[derive(Clone)]
pub struct TokenAuthority {
    catalog: Arc<Catalog>,
}

impl TokenAuthority {
    /// Create an authority over `catalog`
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Classify a presented token
    pub fn classify(&self, token: &str) -> TokenClass {
        match self.catalog.token(token) {
            Some(record) if record.admin => TokenClass::Admin,
            Some(_) => TokenClass::User,
            None => TokenClass::Unknown,
        }
    }

    /// Check whether a token is an admin token
    pub fn is_admin(&self, token: &str) -> bool {
        self.classify(token) == TokenClass::Admin
    }

    /// Issue a new admin token
    pub async fn issue_admin_token(
        &self,
        name: &str,
        description: Option<String>,
    ) -> AuthResult<String> {
        self.issue(name, true, description).await
    }

    /// Issue a new user token
    pub async fn issue_user_token(
        &self,
        name: &str,
        description: Option<String>,
    ) -> AuthResult<String> {
        self.issue(name, false, description).await
    }

    /// Store a caller-chosen token, e.g. a bootstrap token from the environment
    pub async fn install_token(
        &self,
        token: &str,
        name: &str,
        admin: bool,
        description: Option<String>,
    ) -> AuthResult<()> {
        let record = TokenRecord::new(token, name, admin, description);
        self.catalog.add_token(record).await?;
        Ok(())
    }

    async fn issue(
        &self,
        name: &str,
        admin: bool,
        description: Option<String>,
    ) -> AuthResult<String> {
        let mut attempt = 1;
        loop {
            let token = generate_token()?;
            let record = TokenRecord::new(token.clone(), name, admin, description.clone());
            match self.catalog.add_token(record).await {
                Ok(()) => return Ok(token),
                Err(CatalogError::DuplicateToken) if attempt < ISSUE_ATTEMPTS => {
                    tracing::warn!(attempt, "Generated token collided, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
