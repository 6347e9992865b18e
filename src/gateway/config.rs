//! Gateway configuration

use std::time::Duration;

use crate::catalog::refresh::{DEFAULT_REFRESH_INTERVAL, DEFAULT_SCHEMA_TIMEOUT};

/// Default bound on one dispatched query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Bound on one backend query; exceeded → gateway timeout
    pub query_timeout: Duration,
    /// Bound on one database's schema scan
    pub schema_timeout: Duration,
    /// Time between full table refreshes
    pub refresh_interval: Duration,
    /// Dispatch statements that are not plain reads
    pub allow_writes: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            schema_timeout: DEFAULT_SCHEMA_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            allow_writes: false,
        }
    }
}

impl GatewayConfig {
    /// Set the query timeout
    #[must_use]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the schema scan timeout
    #[must_use]
    pub fn schema_timeout(mut self, timeout: Duration) -> Self {
        self.schema_timeout = timeout;
        self
    }

    /// Set the refresh interval
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Allow or refuse non-read-only statements
    #[must_use]
    pub fn allow_writes(mut self, allow: bool) -> Self {
        self.allow_writes = allow;
        self
    }
}
