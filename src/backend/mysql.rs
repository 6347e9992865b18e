//! MySQL driver on top of `mysql_async`

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Pool, TxOpts};

use super::{AccessMode, BackendResult, ConnectionParams, Driver, PoolCache, Row, Value};

/// Default MySQL port
pub const DEFAULT_PORT: u16 = 3306;

const LIST_TABLES_SQL: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema = DATABASE() ORDER BY table_name";

/// Driver for MySQL and MariaDB
pub struct MySqlDriver {
    pools: PoolCache<Pool>,
}

impl MySqlDriver {
    /// Create a driver with an empty pool cache
    pub fn new() -> Self {
        MySqlDriver {
            pools: PoolCache::new(),
        }
    }

    fn pool(&self, params: &ConnectionParams) -> BackendResult<Pool> {
        self.pools.get_or_open(params, |params| {
            let opts: Opts = OptsBuilder::default()
                .ip_or_hostname(params.host_or_default())
                .tcp_port(params.port.unwrap_or(DEFAULT_PORT))
                .user(params.user.clone())
                .pass(params.password.clone())
                .db_name(Some(params.database.clone()))
                .into();
            Ok(Pool::new(opts))
        })
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    async fn execute(
        &self,
        query: &str,
        params: &ConnectionParams,
        mode: AccessMode,
    ) -> BackendResult<Vec<Row>> {
        let mut conn = self.pool(params)?.get_conn().await?;

        // Binary protocol, so values arrive typed instead of as text
        let rows: Vec<mysql_async::Row> = match mode {
            AccessMode::ReadOnly => {
                let mut tx = conn.start_transaction(read_only_tx()).await?;
                let rows = tx.exec(query, ()).await?;
                tx.rollback().await?;
                rows
            }
            AccessMode::ReadWrite => conn.exec(query, ()).await?,
        };

        Ok(rows.iter().map(convert_row).collect())
    }

    async fn list_tables(&self, params: &ConnectionParams) -> BackendResult<Vec<String>> {
        let mut conn = self.pool(params)?.get_conn().await?;
        let tables: Vec<String> = conn.query(LIST_TABLES_SQL).await?;
        Ok(tables)
    }
}

/// `START TRANSACTION READ ONLY`
fn read_only_tx() -> TxOpts {
    let mut opts = TxOpts::default();
    opts.with_readonly(Some(true));
    opts
}

fn convert_row(row: &mysql_async::Row) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns_ref().iter().enumerate() {
        let value = row.as_ref(idx).map(convert_value).unwrap_or_default();
        out.push(column.name_str().into_owned(), value);
    }
    out
}

fn convert_value(value: &mysql_async::Value) -> Value {
    use mysql_async::Value as My;

    match value {
        My::NULL => Value::Null,
        My::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        My::Int(i) => Value::Int(*i),
        My::UInt(u) => i64::try_from(*u)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::String(u.to_string())),
        My::Float(f) => Value::Float(f64::from(*f)),
        My::Double(d) => Value::Float(*d),
        My::Date(year, month, day, hour, minute, second, micros) => {
            let mut s = format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            );
            if *micros > 0 {
                s.push_str(&format!(".{:06}", micros));
            }
            Value::String(s)
        }
        My::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = u64::from(*days) * 24 + u64::from(*hours);
            let sign = if *negative { "-" } else { "" };
            let mut s = format!("{}{:02}:{:02}:{:02}", sign, total_hours, minutes, seconds);
            if *micros > 0 {
                s.push_str(&format!(".{:06}", micros));
            }
            Value::String(s)
        }
    }
}
