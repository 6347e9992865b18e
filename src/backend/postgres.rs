//! PostgreSQL driver on top of `sqlx`

use std::fmt::Write as _;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::types::{PgInterval, PgTimeTz};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgValueFormat};
use sqlx::types::chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use super::{
    AccessMode, BackendError, BackendResult, ConnectionParams, Driver, PoolCache, Row, Value,
    POOL_MAX_CONNECTIONS,
};

/// Default PostgreSQL port
pub const DEFAULT_PORT: u16 = 5432;

const LIST_TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
     ORDER BY table_name";

const BEGIN_READ_ONLY: &str = "BEGIN READ ONLY";

/// Driver for PostgreSQL
pub struct PostgresDriver {
    pools: PoolCache<PgPool>,
}

impl PostgresDriver {
    /// Create a driver with an empty pool cache
    pub fn new() -> Self {
        PostgresDriver {
            pools: PoolCache::new(),
        }
    }

    fn pool(&self, params: &ConnectionParams) -> BackendResult<PgPool> {
        self.pools.get_or_open(params, |params| {
            let mut options = PgConnectOptions::new()
                .host(params.host_or_default())
                .port(params.port.unwrap_or(DEFAULT_PORT))
                .database(&params.database);
            if let Some(user) = &params.user {
                options = options.username(user);
            }
            if let Some(password) = &params.password {
                options = options.password(password);
            }
            Ok(PgPoolOptions::new()
                .max_connections(POOL_MAX_CONNECTIONS)
                .connect_lazy_with(options))
        })
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn execute(
        &self,
        query: &str,
        params: &ConnectionParams,
        mode: AccessMode,
    ) -> BackendResult<Vec<Row>> {
        let pool = self.pool(params)?;
        let rows = match mode {
            AccessMode::ReadOnly => {
                // Also catches writes hidden in functions, e.g. setval()
                let mut tx = pool.begin_with(BEGIN_READ_ONLY).await?;
                let rows = sqlx::query(query).fetch_all(&mut *tx).await?;
                tx.rollback().await?;
                rows
            }
            AccessMode::ReadWrite => sqlx::query(query).fetch_all(&pool).await?,
        };
        rows.iter().map(convert_row).collect()
    }

    async fn list_tables(&self, params: &ConnectionParams) -> BackendResult<Vec<String>> {
        let pool = self.pool(params)?;
        let tables = sqlx::query_scalar::<_, String>(LIST_TABLES_SQL)
            .fetch_all(&pool)
            .await?;
        Ok(tables)
    }
}

fn convert_row(row: &PgRow) -> BackendResult<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let idx = column.ordinal();
        if row.try_get_raw(idx)?.is_null() {
            out.push(column.name(), Value::Null);
            continue;
        }

        let value = match column.type_info().name() {
            "BOOL" => Value::Bool(row.try_get(idx)?),
            "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(idx)?)),
            "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(idx)?)),
            "INT8" => Value::Int(row.try_get::<i64, _>(idx)?),
            "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(idx)?)),
            "FLOAT8" => Value::Float(row.try_get::<f64, _>(idx)?),
            "NUMERIC" => Value::String(row.try_get::<Decimal, _>(idx)?.to_string()),
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
                Value::String(row.try_get::<String, _>(idx)?)
            }
            "TIMESTAMP" => Value::String(row.try_get::<NaiveDateTime, _>(idx)?.to_string()),
            "TIMESTAMPTZ" => {
                Value::String(row.try_get::<DateTime<Utc>, _>(idx)?.to_rfc3339())
            }
            "DATE" => Value::String(row.try_get::<NaiveDate, _>(idx)?.to_string()),
            "TIME" => Value::String(row.try_get::<NaiveTime, _>(idx)?.to_string()),
            "TIMETZ" => Value::String(render_timetz(
                &row.try_get::<PgTimeTz<NaiveTime, FixedOffset>, _>(idx)?,
            )),
            "INTERVAL" => Value::String(render_interval(&row.try_get::<PgInterval, _>(idx)?)),
            "UUID" => Value::String(row.try_get::<Uuid, _>(idx)?.to_string()),
            "JSON" | "JSONB" => Value::String(row.try_get::<JsonValue, _>(idx)?.to_string()),
            "BYTEA" => Value::String(render_bytes(&row.try_get::<Vec<u8>, _>(idx)?)),
            "BOOL[]" => render_array(&row.try_get::<Vec<Option<bool>>, _>(idx)?)?,
            "INT2[]" => render_array(&row.try_get::<Vec<Option<i16>>, _>(idx)?)?,
            "INT4[]" => render_array(&row.try_get::<Vec<Option<i32>>, _>(idx)?)?,
            "INT8[]" => render_array(&row.try_get::<Vec<Option<i64>>, _>(idx)?)?,
            "FLOAT4[]" => render_array(&row.try_get::<Vec<Option<f32>>, _>(idx)?)?,
            "FLOAT8[]" => render_array(&row.try_get::<Vec<Option<f64>>, _>(idx)?)?,
            "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => {
                render_array(&row.try_get::<Vec<Option<String>>, _>(idx)?)?
            }
            _ => {
                let raw = row.try_get_raw(idx)?;
                let bytes = raw
                    .as_bytes()
                    .map_err(|e| BackendError::Execution(e.to_string()))?;
                Value::String(render_raw(raw.format(), bytes))
            }
        };
        out.push(column.name(), value);
    }
    Ok(out)
}

/// Bytes as text, invalid UTF-8 replaced
fn render_bytes(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// JSON array text, e.g. `[1,null,3]`
fn render_array<T: Serialize>(items: &[Option<T>]) -> BackendResult<Value> {
    serde_json::to_string(items)
        .map(Value::String)
        .map_err(|e| BackendError::Execution(e.to_string()))
}

/// ISO 8601 duration, e.g. `P1M2DT3.5S`
fn render_interval(interval: &PgInterval) -> String {
    let mut out = format!("P{}M{}D", interval.months, interval.days);
    if interval.microseconds != 0 {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let _ = write!(out, "T{}{}", sign, micros / 1_000_000);
        let fraction = micros % 1_000_000;
        if fraction != 0 {
            let digits = format!("{:06}", fraction);
            let _ = write!(out, ".{}", digits.trim_end_matches('0'));
        }
        out.push('S');
    }
    out
}

fn render_timetz(value: &PgTimeTz<NaiveTime, FixedOffset>) -> String {
    format!("{}{}", value.time, value.offset)
}

/// Any other type: text-format values as sent, binary ones as `\x` hex
fn render_raw(format: PgValueFormat, bytes: &[u8]) -> String {
    match format {
        PgValueFormat::Text => render_bytes(bytes),
        PgValueFormat::Binary => {
            let mut out = String::with_capacity(2 + bytes.len() * 2);
            out.push_str("\\x");
            for byte in bytes {
                let _ = write!(out, "{:02x}", byte);
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_is_lazy_and_cached() {
        let driver = PostgresDriver::new();
        // Nothing listens here; a lazy pool must still be created
        let params = ConnectionParams::database("app")
            .host("127.0.0.1", 1)
            .credentials("reader", "secret");

        driver.pool(&params).unwrap();
        driver.pool(&params).unwrap();
        assert_eq!(driver.pools.len(), 1);
    }

    #[test]
    fn test_render_bytes_is_lossy() {
        assert_eq!(render_bytes(b"abc"), "abc");
        assert_eq!(render_bytes(&[0x61, 0xff]), "a\u{fffd}");
    }

    #[test]
    fn test_render_array() {
        assert_eq!(
            render_array(&[Some(1i32), None, Some(3)]).unwrap(),
            Value::String("[1,null,3]".into())
        );
        assert_eq!(
            render_array(&[Some("a".to_string()), Some("b\"c".to_string())]).unwrap(),
            Value::String(r#"["a","b\"c"]"#.into())
        );
        assert_eq!(
            render_array::<bool>(&[]).unwrap(),
            Value::String("[]".into())
        );
    }

    #[test]
    fn test_render_interval() {
        let interval = |months, days, microseconds| PgInterval {
            months,
            days,
            microseconds,
        };
        assert_eq!(render_interval(&interval(0, 0, 0)), "P0M0D");
        assert_eq!(render_interval(&interval(1, 2, 3_500_000)), "P1M2DT3.5S");
        assert_eq!(render_interval(&interval(0, 0, -90_000_000)), "P0M0DT-90S");
        assert_eq!(render_interval(&interval(0, 1, 1)), "P0M1DT0.000001S");
    }

    #[test]
    fn test_render_timetz() {
        let value = PgTimeTz {
            time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            offset: FixedOffset::east_opt(2 * 3600).unwrap(),
        };
        assert_eq!(render_timetz(&value), "10:30:00+02:00");
    }

    #[test]
    fn test_render_raw_falls_back_to_text_or_hex() {
        assert_eq!(render_raw(PgValueFormat::Text, b"(1,2)"), "(1,2)");
        assert_eq!(render_raw(PgValueFormat::Binary, &[0x00, 0xab]), "\\x00ab");
    }
}
