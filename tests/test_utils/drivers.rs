//! Scripted drivers

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tablegate::backend::{AccessMode, BackendError, BackendResult, ConnectionParams, Driver, Row};

/// Driver whose schema and results are set by the test
///
/// Table lists are keyed by `ConnectionParams::database`. Every executed query
/// is recorded so tests can assert that nothing was dispatched.
#[derive(Default)]
pub struct MockDriver {
    tables: Mutex<HashMap<String, Vec<String>>>,
    rows: Vec<Row>,
    unreachable: Mutex<HashSet<String>>,
    query_error: Option<String>,
    query_delay: Option<Duration>,
    executed: Mutex<Vec<(String, AccessMode)>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tables(self, database: &str, tables: &[&str]) -> Self {
        self.set_tables(database, tables);
        self
    }

    #[must_use]
    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    /// Every query fails with `message`
    #[must_use]
    pub fn with_query_error(mut self, message: &str) -> Self {
        self.query_error = Some(message.to_string());
        self
    }

    /// Every query sleeps for `delay` first
    #[must_use]
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    /// Replace the live table list of a database
    pub fn set_tables(&self, database: &str, tables: &[&str]) {
        self.tables.lock().insert(
            database.to_string(),
            tables.iter().map(|t| t.to_string()).collect(),
        );
    }

    /// Make schema scans of a database fail, or succeed again
    pub fn set_unreachable(&self, database: &str, unreachable: bool) {
        let mut set = self.unreachable.lock();
        if unreachable {
            set.insert(database.to_string());
        } else {
            set.remove(database);
        }
    }

    /// Queries dispatched so far
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().iter().map(|(q, _)| q.clone()).collect()
    }

    /// Access mode of each dispatched query
    pub fn modes(&self) -> Vec<AccessMode> {
        self.executed.lock().iter().map(|(_, m)| *m).collect()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn execute(
        &self,
        query: &str,
        _params: &ConnectionParams,
        mode: AccessMode,
    ) -> BackendResult<Vec<Row>> {
        self.executed.lock().push((query.to_string(), mode));
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.query_error {
            Some(message) => Err(BackendError::Execution(message.clone())),
            None => Ok(self.rows.clone()),
        }
    }

    async fn list_tables(&self, params: &ConnectionParams) -> BackendResult<Vec<String>> {
        if self.unreachable.lock().contains(&params.database) {
            return Err(BackendError::Execution(format!(
                "could not connect to {}",
                params.database
            )));
        }
        Ok(self
            .tables
            .lock()
            .get(&params.database)
            .cloned()
            .unwrap_or_default())
    }
}
