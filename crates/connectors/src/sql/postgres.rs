use crate::{
    adapter::{DialectAdapter, KeySpec, PageRequest},
    error::AdapterError,
    sql::{dialect, keyset},
    DialectKind, SourceConfig,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};
use model::{
    core::{data_type::DataType, value::Value},
    records::row::Row,
    schema::{column::ColumnMeta, table::TableRef},
};
use std::str::FromStr;
use tokio_postgres::{error::SqlState, Client, NoTls};
use tracing::{debug, warn};

const APPROX_COUNT_THRESHOLD: i64 = 1_000_000;

const QUERY_COLUMNS_SQL: &str = "\
SELECT column_name, data_type, is_nullable, ordinal_position \
FROM information_schema.columns \
WHERE table_name = $2 \
  AND table_schema = COALESCE(NULLIF($1::text, ''), current_schema()) \
ORDER BY ordinal_position";

const QUERY_KEY_SQL: &str = "\
SELECT a.attname, i.indisprimary, i.indexrelid::bigint \
FROM pg_index i \
CROSS JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord) \
JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum \
WHERE i.indrelid = $1::regclass AND (i.indisprimary OR i.indisunique) \
ORDER BY i.indisprimary DESC, i.indexrelid, k.ord";

const QUERY_RELTUPLES_SQL: &str =
    "SELECT reltuples::bigint FROM pg_class WHERE oid = $1::regclass";

pub struct PostgresAdapter {
    client: Client,
    schema: Option<String>,
    dialect: dialect::Postgres,
}

impl PostgresAdapter {
    pub async fn connect(config: &SourceConfig) -> Result<Self, AdapterError> {
        let conn_str = format!(
            "host={} port={} user={} password={} dbname={}",
            config.require("host", &config.host)?,
            config.port.unwrap_or(5432),
            config.require("user", &config.user)?,
            config.require("password", &config.password)?,
            config.require("database", &config.database)?,
        );

        let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection terminated");
            }
        });

        Ok(PostgresAdapter {
            client,
            schema: config.schema.clone(),
            dialect: dialect::Postgres,
        })
    }

    fn quoted_table(&self, table: &TableRef) -> String {
        use crate::sql::dialect::SqlDialect;
        table
            .parts()
            .map(|p| self.dialect.quote_ident(p))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn map_error(err: tokio_postgres::Error, table: &TableRef) -> AdapterError {
        if let Some(db) = err.as_db_error() {
            let code = db.code();
            return if code == &SqlState::UNDEFINED_TABLE {
                AdapterError::NoSuchTable(table.raw().to_string())
            } else if code == &SqlState::INSUFFICIENT_PRIVILEGE {
                AdapterError::PermissionDenied(db.message().to_string())
            } else if code.code().starts_with("42") {
                AdapterError::fetch_permanent(db.message())
            } else if code.code().starts_with("28") {
                AdapterError::Connect(db.message().to_string())
            } else {
                AdapterError::fetch_retryable(db.message())
            };
        }
        // Transport-level failure without a server error: worth retrying.
        AdapterError::fetch_retryable(err)
    }

    fn decode_row(row: &tokio_postgres::Row, columns: &[ColumnMeta]) -> Result<Row, AdapterError> {
        let mut values = Vec::with_capacity(columns.len());
        for (idx, col) in columns.iter().enumerate() {
            let value = match col.data_type {
                DataType::SmallInt => row
                    .try_get::<_, Option<i16>>(idx)
                    .map(|v| v.map(|v| Value::Int(v as i64))),
                DataType::Int => row
                    .try_get::<_, Option<i32>>(idx)
                    .map(|v| v.map(|v| Value::Int(v as i64))),
                DataType::BigInt => row
                    .try_get::<_, Option<i64>>(idx)
                    .map(|v| v.map(Value::Int)),
                DataType::Real => row
                    .try_get::<_, Option<f32>>(idx)
                    .map(|v| v.map(|v| Value::Float(v as f64))),
                DataType::Double => row
                    .try_get::<_, Option<f64>>(idx)
                    .map(|v| v.map(Value::Float)),
                DataType::Boolean => row
                    .try_get::<_, Option<bool>>(idx)
                    .map(|v| v.map(Value::Boolean)),
                DataType::Timestamp => row.try_get::<_, Option<NaiveDateTime>>(idx).map(|v| {
                    v.map(|naive| Value::Timestamp(DateTime::from_naive_utc_and_offset(naive, Utc)))
                }),
                DataType::TimestampTz => row
                    .try_get::<_, Option<DateTime<Utc>>>(idx)
                    .map(|v| v.map(Value::Timestamp)),
                DataType::Bytes => row
                    .try_get::<_, Option<Vec<u8>>>(idx)
                    .map(|v| v.map(Value::Bytes)),
                DataType::Decimal => row.try_get::<_, Option<String>>(idx).map(|v| {
                    v.map(|s| match BigDecimal::from_str(&s) {
                        Ok(d) => Value::Decimal(d),
                        Err(_) => Value::String(s),
                    })
                }),
                // Dates and non-native text arrive cast to text.
                DataType::Date | DataType::Text => row
                    .try_get::<_, Option<String>>(idx)
                    .map(|v| v.map(Value::String)),
            }
            .map_err(AdapterError::fetch_permanent)?;

            values.push(value.unwrap_or(Value::Null));
        }
        Ok(Row::new(values))
    }
}

#[async_trait]
impl DialectAdapter for PostgresAdapter {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    async fn describe_columns(&self, table: &TableRef) -> Result<Vec<ColumnMeta>, AdapterError> {
        let schema = table
            .qualifier()
            .map(str::to_string)
            .or_else(|| self.schema.clone())
            .unwrap_or_default();

        let rows = self
            .client
            .query(QUERY_COLUMNS_SQL, &[&schema, &table.name()])
            .await
            .map_err(|e| Self::map_error(e, table))?;

        if rows.is_empty() {
            return Err(AdapterError::NoSuchTable(table.raw().to_string()));
        }

        Ok(rows
            .iter()
            .enumerate()
            .map(|(ordinal, row)| {
                let name: String = row.get(0);
                let sql_type: String = row.get(1);
                let nullable: String = row.get(2);
                ColumnMeta::new(name, sql_type, nullable.eq_ignore_ascii_case("yes"), ordinal)
            })
            .collect())
    }

    async fn discover_key(&self, table: &TableRef) -> Result<KeySpec, AdapterError> {
        let rows = self
            .client
            .query(QUERY_KEY_SQL, &[&table.raw()])
            .await
            .map_err(|e| Self::map_error(e, table))?;

        if let Some(first) = rows.first() {
            let primary: bool = first.get(1);
            let index_id: i64 = first.get(2);
            let columns: Vec<String> = rows
                .iter()
                .filter(|r| r.get::<_, i64>(2) == index_id)
                .map(|r| r.get::<_, String>(0))
                .collect();
            return Ok(if primary {
                KeySpec::primary_key(columns)
            } else {
                KeySpec::unique_index(columns)
            });
        }

        // No PK or unique index: order by every column.
        let columns = self.describe_columns(table).await?;
        debug!(table = %table, "no key constraint found, falling back to column order");
        Ok(KeySpec::column_order(
            columns.into_iter().map(|c| c.name).collect(),
        ))
    }

    async fn estimate_rows(&self, table: &TableRef) -> Result<u64, AdapterError> {
        let count_sql = format!("SELECT COUNT(*) FROM {}", self.quoted_table(table));
        let count: i64 = match self.client.query_one(&count_sql, &[]).await {
            Ok(row) => row.get(0),
            Err(e) => {
                warn!(table = %table, error = %e, "row count unavailable, reporting 0");
                return Ok(0);
            }
        };

        // Exact counts get slow on big heaps; switch to planner statistics.
        if count > APPROX_COUNT_THRESHOLD {
            if let Ok(row) = self
                .client
                .query_one(QUERY_RELTUPLES_SQL, &[&table.raw()])
                .await
            {
                let estimate: i64 = row.get(0);
                if estimate > 0 {
                    return Ok(estimate as u64);
                }
            }
        }

        Ok(count.max(0) as u64)
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Row>, AdapterError> {
        let sql = keyset::build_page_sql(&self.dialect, request);
        debug!(table = %request.table, limit = request.limit, "fetching page");

        let rows = self
            .client
            .query(&sql, &[])
            .await
            .map_err(|e| Self::map_error(e, &request.table))?;

        rows.iter()
            .map(|r| Self::decode_row(r, &request.columns))
            .collect()
    }

    fn row_id_column(&self) -> Option<ColumnMeta> {
        // ctid is fetched as text and compared as an untyped literal.
        Some(ColumnMeta::new("ctid", "tid", false, 0))
    }

    async fn close(&self) {
        // tokio-postgres closes on drop; nothing to flush here.
        debug!("closing postgres adapter");
    }
}
