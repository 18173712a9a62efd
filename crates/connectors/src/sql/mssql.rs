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
use tiberius::{AuthMethod, Client, Config};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

const APPROX_COUNT_THRESHOLD: i64 = 1_000_000;

const QUERY_COLUMNS_SQL: &str = "\
SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE \
FROM INFORMATION_SCHEMA.COLUMNS \
WHERE TABLE_NAME = @P1 AND (@P2 = '' OR TABLE_SCHEMA = @P2) \
ORDER BY ORDINAL_POSITION";

const QUERY_KEY_SQL: &str = "\
SELECT c.name, i.is_primary_key, i.index_id \
FROM sys.indexes i \
JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
WHERE i.object_id = OBJECT_ID(@P1) AND (i.is_primary_key = 1 OR i.is_unique = 1) \
ORDER BY i.is_primary_key DESC, i.index_id, ic.key_ordinal";

const QUERY_PARTITION_STATS_SQL: &str = "\
SELECT SUM(row_count) \
FROM sys.dm_db_partition_stats \
WHERE object_id = OBJECT_ID(@P1) AND index_id IN (0, 1)";

type MssqlClient = Client<Compat<TcpStream>>;

pub struct SqlServerAdapter {
    client: Mutex<MssqlClient>,
    schema: Option<String>,
    dialect: dialect::SqlServer,
}

impl SqlServerAdapter {
    pub async fn connect(source: &SourceConfig) -> Result<Self, AdapterError> {
        let mut config = Config::new();
        config.host(source.require("host", &source.host)?);
        config.port(source.port.unwrap_or(1433));
        config.database(source.require("database", &source.database)?);
        config.authentication(AuthMethod::sql_server(
            source.require("user", &source.user)?,
            source.require("password", &source.password)?,
        ));
        config.trust_cert();

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| AdapterError::Connect(e.to_string()))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| AdapterError::Connect(e.to_string()))?;

        Ok(SqlServerAdapter {
            client: Mutex::new(client),
            schema: source.schema.clone(),
            dialect: dialect::SqlServer,
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

    fn map_error(err: tiberius::error::Error, table: &TableRef) -> AdapterError {
        if let tiberius::error::Error::Server(token) = &err {
            return match token.code() {
                208 => AdapterError::NoSuchTable(table.raw().to_string()),
                229 | 230 | 297 => AdapterError::PermissionDenied(token.message().to_string()),
                // Parse and binding failures never heal on retry.
                102 | 105 | 156 | 207 => AdapterError::fetch_permanent(token.message()),
                18456 => AdapterError::Connect(token.message().to_string()),
                _ => AdapterError::fetch_retryable(token.message()),
            };
        }
        AdapterError::fetch_retryable(err)
    }

    fn decode_row(row: &tiberius::Row, columns: &[ColumnMeta]) -> Result<Row, AdapterError> {
        let mut values = Vec::with_capacity(columns.len());
        for (idx, col) in columns.iter().enumerate() {
            let value = match col.data_type {
                DataType::SmallInt => {
                    // tinyint maps to u8 on the wire, the rest to i16.
                    if col.sql_type.eq_ignore_ascii_case("tinyint") {
                        row.try_get::<u8, _>(idx)
                            .map(|v| v.map(|v| Value::Int(v as i64)))
                    } else {
                        row.try_get::<i16, _>(idx)
                            .map(|v| v.map(|v| Value::Int(v as i64)))
                    }
                }
                DataType::Int => row
                    .try_get::<i32, _>(idx)
                    .map(|v| v.map(|v| Value::Int(v as i64))),
                DataType::BigInt => row.try_get::<i64, _>(idx).map(|v| v.map(Value::Int)),
                DataType::Real => row
                    .try_get::<f32, _>(idx)
                    .map(|v| v.map(|v| Value::Float(v as f64))),
                DataType::Double => row.try_get::<f64, _>(idx).map(|v| v.map(Value::Float)),
                DataType::Boolean => row.try_get::<bool, _>(idx).map(|v| v.map(Value::Boolean)),
                DataType::Timestamp => row.try_get::<NaiveDateTime, _>(idx).map(|v| {
                    v.map(|naive| Value::Timestamp(DateTime::from_naive_utc_and_offset(naive, Utc)))
                }),
                DataType::TimestampTz => row
                    .try_get::<DateTime<Utc>, _>(idx)
                    .map(|v| v.map(Value::Timestamp)),
                DataType::Bytes => row
                    .try_get::<&[u8], _>(idx)
                    .map(|v| v.map(|b| Value::Bytes(b.to_vec()))),
                DataType::Decimal => row.try_get::<&str, _>(idx).map(|v| {
                    v.map(|s| match BigDecimal::from_str(s) {
                        Ok(d) => Value::Decimal(d),
                        Err(_) => Value::String(s.to_string()),
                    })
                }),
                DataType::Date | DataType::Text => row
                    .try_get::<&str, _>(idx)
                    .map(|v| v.map(|s| Value::String(s.to_string()))),
            }
            .map_err(AdapterError::fetch_permanent)?;

            values.push(value.unwrap_or(Value::Null));
        }
        Ok(Row::new(values))
    }
}

#[async_trait]
impl DialectAdapter for SqlServerAdapter {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    async fn describe_columns(&self, table: &TableRef) -> Result<Vec<ColumnMeta>, AdapterError> {
        let schema = table
            .qualifier()
            .map(str::to_string)
            .or_else(|| self.schema.clone())
            .unwrap_or_default();

        let mut client = self.client.lock().await;
        let rows = client
            .query(QUERY_COLUMNS_SQL, &[&table.name(), &schema.as_str()])
            .await
            .map_err(|e| Self::map_error(e, table))?
            .into_first_result()
            .await
            .map_err(|e| Self::map_error(e, table))?;

        if rows.is_empty() {
            return Err(AdapterError::NoSuchTable(table.raw().to_string()));
        }

        rows.iter()
            .enumerate()
            .map(|(ordinal, row)| {
                let name = row
                    .try_get::<&str, _>(0)
                    .map_err(AdapterError::fetch_permanent)?
                    .unwrap_or_default()
                    .to_string();
                let sql_type = row
                    .try_get::<&str, _>(1)
                    .map_err(AdapterError::fetch_permanent)?
                    .unwrap_or_default()
                    .to_string();
                let nullable = row
                    .try_get::<&str, _>(2)
                    .map_err(AdapterError::fetch_permanent)?
                    .unwrap_or_default()
                    .eq_ignore_ascii_case("yes");
                Ok(ColumnMeta::new(name, sql_type, nullable, ordinal))
            })
            .collect()
    }

    async fn discover_key(&self, table: &TableRef) -> Result<KeySpec, AdapterError> {
        let raw = table.raw().to_string();
        let mut client = self.client.lock().await;
        let rows = client
            .query(QUERY_KEY_SQL, &[&raw.as_str()])
            .await
            .map_err(|e| Self::map_error(e, table))?
            .into_first_result()
            .await
            .map_err(|e| Self::map_error(e, table))?;
        drop(client);

        if let Some(first) = rows.first() {
            let primary = first
                .try_get::<bool, _>(1)
                .map_err(AdapterError::fetch_permanent)?
                .unwrap_or(false);
            let index_id = first
                .try_get::<i32, _>(2)
                .map_err(AdapterError::fetch_permanent)?
                .unwrap_or(0);

            let mut columns = Vec::new();
            for row in &rows {
                if row.try_get::<i32, _>(2).ok().flatten() != Some(index_id) {
                    continue;
                }
                if let Some(name) = row.try_get::<&str, _>(0).ok().flatten() {
                    columns.push(name.to_string());
                }
            }
            return Ok(if primary {
                KeySpec::primary_key(columns)
            } else {
                KeySpec::unique_index(columns)
            });
        }

        let columns = self.describe_columns(table).await?;
        debug!(table = %table, "no key constraint found, falling back to column order");
        Ok(KeySpec::column_order(
            columns.into_iter().map(|c| c.name).collect(),
        ))
    }

    async fn estimate_rows(&self, table: &TableRef) -> Result<u64, AdapterError> {
        let count_sql = format!("SELECT COUNT_BIG(*) FROM {}", self.quoted_table(table));
        let mut client = self.client.lock().await;

        let count = match client.simple_query(&count_sql).await {
            Ok(stream) => match stream.into_first_result().await {
                Ok(rows) => rows
                    .first()
                    .and_then(|r| r.try_get::<i64, _>(0).ok().flatten())
                    .unwrap_or(0),
                Err(e) => {
                    warn!(table = %table, error = %e, "row count unavailable, reporting 0");
                    return Ok(0);
                }
            },
            Err(e) => {
                warn!(table = %table, error = %e, "row count unavailable, reporting 0");
                return Ok(0);
            }
        };

        if count > APPROX_COUNT_THRESHOLD {
            let raw = table.raw().to_string();
            if let Ok(stream) = client.query(QUERY_PARTITION_STATS_SQL, &[&raw.as_str()]).await {
                if let Ok(rows) = stream.into_first_result().await {
                    if let Some(estimate) = rows
                        .first()
                        .and_then(|r| r.try_get::<i64, _>(0).ok().flatten())
                    {
                        if estimate > 0 {
                            return Ok(estimate as u64);
                        }
                    }
                }
            }
        }

        Ok(count.max(0) as u64)
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Row>, AdapterError> {
        let sql = keyset::build_page_sql(&self.dialect, request);
        debug!(table = %request.table, limit = request.limit, "fetching page");

        let mut client = self.client.lock().await;
        let rows = client
            .simple_query(&sql)
            .await
            .map_err(|e| Self::map_error(e, &request.table))?
            .into_first_result()
            .await
            .map_err(|e| Self::map_error(e, &request.table))?;
        drop(client);

        rows.iter()
            .map(|r| Self::decode_row(r, &request.columns))
            .collect()
    }

    async fn close(&self) {
        debug!("closing sql server adapter");
    }
}
