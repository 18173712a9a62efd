use crate::{
    adapter::{DialectAdapter, KeySpec, PageRequest},
    error::AdapterError,
    sql::{dialect, keyset},
    DialectKind, SourceConfig,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::DateTime;
use duckdb::{types::ValueRef, Connection};
use model::{
    records::row::Row,
    schema::{column::ColumnMeta, table::TableRef},
};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const QUERY_COLUMNS_SQL: &str = "\
SELECT column_name, data_type, is_nullable \
FROM information_schema.columns \
WHERE table_name = ? \
ORDER BY ordinal_position";

/// Embedded DuckDB source.
///
/// The `duckdb` connection is synchronous, so every call hops onto the
/// blocking pool; the connection itself is shared behind a mutex.
pub struct DuckDbAdapter {
    conn: Arc<Mutex<Connection>>,
    dialect: dialect::DuckDb,
}

impl DuckDbAdapter {
    pub async fn open(config: &SourceConfig) -> Result<Self, AdapterError> {
        let path = config.require("database", &config.database)?;
        let conn = tokio::task::spawn_blocking(move || Connection::open(path))
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?
            .map_err(|e| AdapterError::Connect(e.to_string()))?;

        Ok(DuckDbAdapter {
            conn: Arc::new(Mutex::new(conn)),
            dialect: dialect::DuckDb,
        })
    }

    fn map_error(err: duckdb::Error, table: &TableRef) -> AdapterError {
        let message = err.to_string();
        if message.contains("does not exist") || message.contains("Catalog Error") {
            AdapterError::NoSuchTable(table.raw().to_string())
        } else {
            // An embedded engine fails deterministically; retrying is noise.
            AdapterError::fetch_permanent(message)
        }
    }

    fn decode_value(value: ValueRef<'_>) -> model::core::value::Value {
        use model::core::value::Value;
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Boolean(v) => Value::Boolean(v),
            ValueRef::TinyInt(v) => Value::Int(v as i64),
            ValueRef::SmallInt(v) => Value::Int(v as i64),
            ValueRef::Int(v) => Value::Int(v as i64),
            ValueRef::BigInt(v) => Value::Int(v),
            ValueRef::HugeInt(v) => Value::Decimal(BigDecimal::from(v)),
            ValueRef::UTinyInt(v) => Value::Int(v as i64),
            ValueRef::USmallInt(v) => Value::Int(v as i64),
            ValueRef::UInt(v) => Value::Int(v as i64),
            ValueRef::UBigInt(v) => i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Decimal(BigDecimal::from(v))),
            ValueRef::Float(v) => Value::Float(v as f64),
            ValueRef::Double(v) => Value::Float(v),
            ValueRef::Timestamp(unit, raw) => {
                let micros = match unit {
                    duckdb::types::TimeUnit::Second => raw.saturating_mul(1_000_000),
                    duckdb::types::TimeUnit::Millisecond => raw.saturating_mul(1_000),
                    duckdb::types::TimeUnit::Microsecond => raw,
                    duckdb::types::TimeUnit::Nanosecond => raw / 1_000,
                };
                DateTime::from_timestamp_micros(micros)
                    .map(Value::Timestamp)
                    .unwrap_or(Value::Null)
            }
            ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
            other => Value::String(format!("{other:?}")),
        }
    }

    /// Runs a closure against the shared connection on the blocking pool.
    async fn with_conn<T, F>(&self, table: &TableRef, f: F) -> Result<T, AdapterError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, duckdb::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = table.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| AdapterError::fetch_permanent("duckdb connection poisoned"))?;
            f(&guard).map_err(|e| Self::map_error(e, &table))
        })
        .await
        .map_err(|e| AdapterError::fetch_permanent(e.to_string()))?
    }
}

#[async_trait]
impl DialectAdapter for DuckDbAdapter {
    fn kind(&self) -> DialectKind {
        DialectKind::DuckDb
    }

    async fn describe_columns(&self, table: &TableRef) -> Result<Vec<ColumnMeta>, AdapterError> {
        let name = table.name().to_string();
        let columns = self
            .with_conn(table, move |conn| {
                let mut stmt = conn.prepare(QUERY_COLUMNS_SQL)?;
                let mut rows = stmt.query([name])?;
                let mut columns = Vec::new();
                while let Some(row) = rows.next()? {
                    let name: String = row.get(0)?;
                    let sql_type: String = row.get(1)?;
                    let nullable: String = row.get(2)?;
                    let ordinal = columns.len();
                    columns.push(ColumnMeta::new(
                        name,
                        sql_type,
                        nullable.eq_ignore_ascii_case("yes"),
                        ordinal,
                    ));
                }
                Ok(columns)
            })
            .await?;

        if columns.is_empty() {
            return Err(AdapterError::NoSuchTable(table.raw().to_string()));
        }
        Ok(columns)
    }

    async fn discover_key(&self, table: &TableRef) -> Result<KeySpec, AdapterError> {
        let raw = table.raw().to_string();
        let pk_columns = self
            .with_conn(table, move |conn| {
                let sql = format!(
                    "SELECT name FROM pragma_table_info('{}') WHERE pk ORDER BY cid",
                    raw.replace('\'', "''")
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query([])?;
                let mut columns = Vec::new();
                while let Some(row) = rows.next()? {
                    columns.push(row.get::<_, String>(0)?);
                }
                Ok(columns)
            })
            .await?;

        if !pk_columns.is_empty() {
            return Ok(KeySpec::primary_key(pk_columns));
        }

        let columns = self.describe_columns(table).await?;
        debug!(table = %table, "no primary key found, falling back to column order");
        Ok(KeySpec::column_order(
            columns.into_iter().map(|c| c.name).collect(),
        ))
    }

    async fn estimate_rows(&self, table: &TableRef) -> Result<u64, AdapterError> {
        use crate::sql::dialect::SqlDialect;
        let quoted = table
            .parts()
            .map(|p| self.dialect.quote_ident(p))
            .collect::<Vec<_>>()
            .join(".");

        let result = self
            .with_conn(table, move |conn| {
                conn.query_row(&format!("SELECT COUNT(*) FROM {quoted}"), [], |row| {
                    row.get::<_, i64>(0)
                })
            })
            .await;

        match result {
            Ok(count) => Ok(count.max(0) as u64),
            Err(e) => {
                warn!(table = %table, error = %e, "row count unavailable, reporting 0");
                Ok(0)
            }
        }
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Row>, AdapterError> {
        let sql = keyset::build_page_sql(&self.dialect, request);
        let width = request.columns.len();
        debug!(table = %request.table, limit = request.limit, "fetching page");

        self.with_conn(&request.table, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for idx in 0..width {
                    values.push(Self::decode_value(row.get_ref(idx)?));
                }
                out.push(Row::new(values));
            }
            Ok(out)
        })
        .await
    }

    fn row_id_column(&self) -> Option<ColumnMeta> {
        Some(ColumnMeta::new("rowid", "bigint", false, 0))
    }

    async fn close(&self) {
        debug!("closing duckdb adapter");
    }
}
