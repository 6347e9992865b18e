//! Table set refresh
//!
//! Table sets are never edited by callers: they are rebuilt by scanning each
//! database's live schema through its driver. Every database is scanned in
//! its own task with a timeout, and each successful scan swaps that
//! database's set in one step, so readers see either the old set or the new
//! one. A failing database is logged and reported and never blocks the rest.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::{Catalog, CatalogError, CatalogResult, DatabaseDef};
use crate::backend::{BackendError, BackendResult, Driver, DriverRegistry};

/// Default time between two full refreshes
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Default bound on one database's schema scan
pub const DEFAULT_SCHEMA_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one full refresh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    /// Databases whose table set was replaced, sorted
    pub refreshed: Vec<String>,
    /// Databases whose scan failed, with the reason, sorted by name
    pub failed: Vec<(String, BackendError)>,
}

impl RefreshReport {
    /// True if no database failed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

async fn scan_tables(
    driver: Arc<dyn Driver>,
    def: &DatabaseDef,
    schema_timeout: Duration,
) -> BackendResult<BTreeSet<String>> {
    let tables = timeout(schema_timeout, driver.list_tables(&def.params))
        .await
        .map_err(|_| BackendError::Timeout(schema_timeout))??;

    Ok(tables
        .iter()
        .map(|table| def.engine.canonical_table_name(table))
        .collect())
}

impl Catalog {
    /// Rescan every registered database and swap in the new table sets
    pub async fn refresh_tables(
        &self,
        registry: &DriverRegistry,
        schema_timeout: Duration,
    ) -> RefreshReport {
        let mut scans = JoinSet::new();
        for def in self.database_defs() {
            let driver = registry.resolve(def.engine);
            scans.spawn(async move {
                let result = match driver {
                    Ok(driver) => scan_tables(driver, &def, schema_timeout).await,
                    Err(e) => Err(e),
                };
                (def, result)
            });
        }

        let mut report = RefreshReport::default();
        while let Some(joined) = scans.join_next().await {
            match joined {
                Ok((def, Ok(tables))) => {
                    let count = tables.len();
                    if self.replace_tables(&def, tables) {
                        tracing::debug!(database = %def.name, tables = count, "Refreshed table set");
                        report.refreshed.push(def.name.clone());
                    } else {
                        tracing::debug!(database = %def.name, "Database changed during refresh, scan dropped");
                    }
                }
                Ok((def, Err(e))) => {
                    tracing::warn!(database = %def.name, error = %e, "Schema scan failed");
                    report.failed.push((def.name.clone(), e));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Schema scan task panicked");
                }
            }
        }

        report.refreshed.sort();
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    /// Rescan one database, returning its new table count
    pub async fn refresh_database(
        &self,
        name: &str,
        registry: &DriverRegistry,
        schema_timeout: Duration,
    ) -> CatalogResult<usize> {
        let def = self.database(name)?;
        let scan_error = |source| CatalogError::SchemaScan {
            database: name.to_string(),
            source,
        };

        let driver = registry.resolve(def.engine).map_err(scan_error)?;
        let tables = scan_tables(driver, &def, schema_timeout)
            .await
            .map_err(scan_error)?;

        let count = tables.len();
        if !self.replace_tables(&def, tables) {
            return Err(CatalogError::DatabaseNotFound(name.to_string()));
        }
        tracing::debug!(database = %name, tables = count, "Refreshed table set");
        Ok(count)
    }
}

/// Background task that refreshes every table set on an interval
///
/// The first refresh runs immediately when the task starts.
pub struct RefreshTask {
    catalog: Arc<Catalog>,
    registry: DriverRegistry,
    interval: Duration,
    schema_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl RefreshTask {
    /// Create a new refresh task
    ///
    /// # Arguments
    /// * `catalog` - The catalog whose table sets are refreshed
    /// * `registry` - Drivers used for the schema scans
    /// * `interval` - Time between refreshes
    /// * `schema_timeout` - Bound on each database's scan
    /// * `shutdown_rx` - Receiver for shutdown signal
    pub fn new(
        catalog: Arc<Catalog>,
        registry: DriverRegistry,
        interval: Duration,
        schema_timeout: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            catalog,
            registry,
            interval,
            schema_timeout,
            shutdown_rx,
        }
    }

    /// Spawn the task and return a handle that stops it
    pub fn spawn(
        catalog: Arc<Catalog>,
        registry: DriverRegistry,
        interval: Duration,
        schema_timeout: Duration,
    ) -> RefreshHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = RefreshTask::new(catalog, registry, interval, schema_timeout, shutdown_rx);
        RefreshHandle {
            shutdown_tx,
            task: tokio::spawn(task.run()),
        }
    }

    /// Run until the shutdown signal is sent or its sender dropped
    pub async fn run(mut self) {
        // interval() panics on a zero period
        let mut ticker = interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_once().await;
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        tracing::info!("Refresh task shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn refresh_once(&self) {
        let report = self
            .catalog
            .refresh_tables(&self.registry, self.schema_timeout)
            .await;
        tracing::info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            "Table refresh finished"
        );
    }
}

/// Stops a spawned [`RefreshTask`]
pub struct RefreshHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Signal shutdown and wait for the task to exit
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Refresh task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AccessMode, ConnectionParams, EngineType, Row};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports `tables` for every database except the one named `broken`
    struct SchemaDriver {
        tables: Vec<String>,
        scans: AtomicUsize,
    }

    #[async_trait]
    impl Driver for SchemaDriver {
        async fn execute(
            &self,
            _query: &str,
            _params: &ConnectionParams,
            _mode: AccessMode,
        ) -> BackendResult<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn list_tables(&self, params: &ConnectionParams) -> BackendResult<Vec<String>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            match params.database.as_str() {
                "broken" => Err(BackendError::Execution("connection refused".into())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(self.tables.clone())
                }
                _ => Ok(self.tables.clone()),
            }
        }
    }

    fn setup(names: &[&str]) -> (Arc<Catalog>, DriverRegistry, Arc<SchemaDriver>) {
        let catalog = Arc::new(Catalog::in_memory());
        for name in names {
            catalog
                .register_database(DatabaseDef::new(
                    *name,
                    EngineType::Sqlite,
                    ConnectionParams::database(*name),
                ))
                .unwrap();
        }
        let driver = Arc::new(SchemaDriver {
            tables: vec!["Orders".to_string(), "items".to_string()],
            scans: AtomicUsize::new(0),
        });
        let registry = DriverRegistry::new().with_driver(EngineType::Sqlite, driver.clone());
        (catalog, registry, driver)
    }

    #[tokio::test]
    async fn test_refresh_isolates_failures() {
        let (catalog, registry, _) = setup(&["shop", "broken", "crm"]);

        let report = catalog
            .refresh_tables(&registry, DEFAULT_SCHEMA_TIMEOUT)
            .await;

        assert_eq!(report.refreshed, vec!["crm", "shop"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert!(!report.is_clean());

        // Canonicalized for the engine
        assert_eq!(catalog.list_tables("shop").unwrap(), vec!["items", "orders"]);
        assert!(catalog.list_tables("broken").unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_times_out_slow_database() {
        let (catalog, registry, _) = setup(&["shop", "slow"]);

        let report = catalog
            .refresh_tables(&registry, Duration::from_secs(1))
            .await;

        assert_eq!(report.refreshed, vec!["shop"]);
        assert_eq!(
            report.failed,
            vec![("slow".to_string(), BackendError::Timeout(Duration::from_secs(1)))]
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_set() {
        let (catalog, registry, _) = setup(&["shop"]);
        let def = catalog.database("shop").unwrap();
        catalog.replace_tables(&def, BTreeSet::from(["legacy".to_string()]));

        let empty = DriverRegistry::new();
        let report = catalog.refresh_tables(&empty, DEFAULT_SCHEMA_TIMEOUT).await;
        assert!(matches!(
            report.failed[0].1,
            BackendError::UnsupportedEngine(EngineType::Sqlite)
        ));
        assert_eq!(catalog.list_tables("shop").unwrap(), vec!["legacy"]);

        assert_eq!(
            catalog
                .refresh_database("shop", &registry, DEFAULT_SCHEMA_TIMEOUT)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_refresh_database_errors() {
        let (catalog, registry, _) = setup(&["broken"]);
        assert!(matches!(
            catalog
                .refresh_database("nope", &registry, DEFAULT_SCHEMA_TIMEOUT)
                .await,
            Err(CatalogError::DatabaseNotFound(_))
        ));
        assert!(matches!(
            catalog
                .refresh_database("broken", &registry, DEFAULT_SCHEMA_TIMEOUT)
                .await,
            Err(CatalogError::SchemaScan { .. })
        ));
    }

    #[tokio::test]
    async fn test_task_runs_immediately_and_stops() {
        let (catalog, registry, driver) = setup(&["shop"]);

        let handle = RefreshTask::spawn(
            catalog.clone(),
            registry,
            DEFAULT_REFRESH_INTERVAL,
            DEFAULT_SCHEMA_TIMEOUT,
        );

        // First tick fires at once
        for _ in 0..100 {
            if driver.scans.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop().await;

        assert_eq!(driver.scans.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.list_tables("shop").unwrap(), vec!["items", "orders"]);
    }
}
