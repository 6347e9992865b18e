//! SQLite driver on top of `sqlx`

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use super::{
    AccessMode, BackendResult, ConnectionParams, Driver, PoolCache, Row, Value,
    POOL_MAX_CONNECTIONS,
};

const LIST_TABLES_SQL: &str = "SELECT name FROM sqlite_master \
     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name";

/// Driver for SQLite database files
///
/// `ConnectionParams::database` is the file path. Missing files are an
/// error rather than being created. Read-only queries and schema scans go
/// through a separate pool whose connections open the file read-only.
pub struct SqliteDriver {
    read_pools: PoolCache<SqlitePool>,
    write_pools: PoolCache<SqlitePool>,
}

impl SqliteDriver {
    /// Create a driver with empty pool caches
    pub fn new() -> Self {
        SqliteDriver {
            read_pools: PoolCache::new(),
            write_pools: PoolCache::new(),
        }
    }

    fn pool(&self, params: &ConnectionParams, mode: AccessMode) -> BackendResult<SqlitePool> {
        let (pools, read_only) = match mode {
            AccessMode::ReadOnly => (&self.read_pools, true),
            AccessMode::ReadWrite => (&self.write_pools, false),
        };
        pools.get_or_open(params, |params| {
            let options = SqliteConnectOptions::new()
                .filename(&params.database)
                .create_if_missing(false)
                .read_only(read_only);
            Ok(SqlitePoolOptions::new()
                .max_connections(POOL_MAX_CONNECTIONS)
                .connect_lazy_with(options))
        })
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn execute(
        &self,
        query: &str,
        params: &ConnectionParams,
        mode: AccessMode,
    ) -> BackendResult<Vec<Row>> {
        let pool = self.pool(params, mode)?;
        let rows = sqlx::query(query).fetch_all(&pool).await?;
        rows.iter().map(convert_row).collect()
    }

    async fn list_tables(&self, params: &ConnectionParams) -> BackendResult<Vec<String>> {
        let pool = self.pool(params, AccessMode::ReadOnly)?;
        let tables = sqlx::query_scalar::<_, String>(LIST_TABLES_SQL)
            .fetch_all(&pool)
            .await?;
        Ok(tables)
    }
}

fn convert_row(row: &SqliteRow) -> BackendResult<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let idx = column.ordinal();

        // SQLite is dynamically typed: branch on the storage class of this value
        let storage_class = {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_string())
            }
        };
        let Some(storage_class) = storage_class else {
            out.push(column.name(), Value::Null);
            continue;
        };

        let declared_bool = column.type_info().name() == "BOOLEAN";
        let value = match storage_class.as_str() {
            "INTEGER" | "BOOLEAN" if declared_bool => {
                Value::Bool(row.try_get_unchecked::<i64, _>(idx)? != 0)
            }
            "INTEGER" | "BOOLEAN" => Value::Int(row.try_get_unchecked::<i64, _>(idx)?),
            "REAL" | "NUMERIC" => Value::Float(row.try_get_unchecked::<f64, _>(idx)?),
            "BLOB" => {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => Value::String(row.try_get_unchecked::<String, _>(idx)?),
        };
        out.push(column.name(), value);
    }
    Ok(out)
}
