//! Per-table grant checks

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{AuthError, AuthResult};
use crate::catalog::Catalog;

/// Decides whether a token may read tables of a database
#[derive(Clone)]
pub struct GrantChecker {
    catalog: Arc<Catalog>,
}

impl GrantChecker {
    /// Create a checker over `catalog`
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Check one table
    pub fn check(&self, token: &str, database: &str, table: &str) -> bool {
        self.catalog.has_access(token, database, table)
    }

    /// Check every table, failing on the first denied one in sorted order
    pub fn check_all(
        &self,
        token: &str,
        database: &str,
        tables: &BTreeSet<String>,
    ) -> AuthResult<()> {
        match tables
            .iter()
            .find(|table| !self.check(token, database, table))
        {
            Some(table) => Err(AuthError::AccessDenied {
                table: table.clone(),
            }),
            None => Ok(()),
        }
    }
}
