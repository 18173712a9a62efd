use crate::{
    adapter::{DialectAdapter, KeySpec, PageRequest},
    error::AdapterError,
    http::{self, RestClient},
    sql::{dialect, keyset},
    DialectKind, SourceConfig,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use model::{
    core::{data_type::DataType, value::Value},
    records::row::Row,
    schema::{column::ColumnMeta, table::TableRef},
};
use serde_json::{json, Value as Json};
use std::{str::FromStr, time::Duration};
use tracing::{debug, warn};

const TOKEN_TYPE_HEADER: (&str, &str) = ("X-Snowflake-Authorization-Token-Type", "OAUTH");
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLLS: usize = 120;

/// Snowflake source over the SQL API (`/api/v2/statements`).
pub struct SnowflakeAdapter {
    client: RestClient,
    base_url: String,
    database: String,
    schema: String,
    warehouse: String,
    role: String,
    dialect: dialect::Snowflake,
}

struct StatementResult {
    row_type: Vec<(String, String)>,
    rows: Vec<Vec<Option<String>>>,
}

impl SnowflakeAdapter {
    pub fn new(config: &SourceConfig) -> Result<Self, AdapterError> {
        let account = config.require("account", &config.account)?;
        let token = http::resolve_token(&config.token, &config.credentials_file)?;
        Ok(SnowflakeAdapter {
            client: RestClient::new(token)?,
            base_url: format!("https://{account}.snowflakecomputing.com"),
            database: config.require("database", &config.database)?,
            schema: config.schema.clone().unwrap_or_else(|| "PUBLIC".into()),
            warehouse: config.require("warehouse", &config.warehouse)?,
            role: config.require("role", &config.role)?,
            dialect: dialect::Snowflake,
        })
    }

    async fn run_statement(&self, sql: &str) -> Result<StatementResult, AdapterError> {
        let url = format!("{}/api/v2/statements", self.base_url);
        let body = json!({
            "statement": sql,
            "timeout": 60,
            "database": self.database,
            "schema": self.schema,
            "warehouse": self.warehouse,
            "role": self.role,
        });

        let mut response = self
            .client
            .post_json(&url, &body, &[TOKEN_TYPE_HEADER])
            .await?;

        // 202 means the statement is still executing; poll the handle.
        let mut polls = 0;
        while response["__accepted"].as_bool().unwrap_or(false) {
            if polls >= MAX_POLLS {
                return Err(AdapterError::fetch_retryable("statement polling timed out"));
            }
            polls += 1;
            tokio::time::sleep(POLL_INTERVAL).await;
            let handle = response["statementHandle"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let poll_url = format!("{}/api/v2/statements/{handle}", self.base_url);
            response = self.client.get_json(&poll_url, &[TOKEN_TYPE_HEADER]).await?;
        }

        let row_type: Vec<(String, String)> = response["resultSetMetaData"]["rowType"]
            .as_array()
            .map(|fields| {
                fields
                    .iter()
                    .map(|f| {
                        (
                            f["name"].as_str().unwrap_or_default().to_string(),
                            f["type"].as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut rows = Self::collect_rows(&response["data"]);

        let partitions = response["resultSetMetaData"]["partitionInfo"]
            .as_array()
            .map(|p| p.len())
            .unwrap_or(1);
        if partitions > 1 {
            let handle = response["statementHandle"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            for partition in 1..partitions {
                let part_url = format!(
                    "{}/api/v2/statements/{handle}?partition={partition}",
                    self.base_url
                );
                let part = self.client.get_json(&part_url, &[TOKEN_TYPE_HEADER]).await?;
                rows.extend(Self::collect_rows(&part["data"]));
            }
        }

        Ok(StatementResult { row_type, rows })
    }

    fn collect_rows(data: &Json) -> Vec<Vec<Option<String>>> {
        data.as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cells| cells.iter().map(http::cell_text).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn decode_cell(cell: Option<&String>, column: &ColumnMeta) -> Value {
        let Some(raw) = cell else {
            return Value::Null;
        };
        match column.data_type {
            t if t.is_integer() => raw
                .parse::<i64>()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::String(raw.clone())),
            t if t.is_floating() => raw
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::String(raw.clone())),
            DataType::Decimal => BigDecimal::from_str(raw)
                .map(Value::Decimal)
                .unwrap_or_else(|_| Value::String(raw.clone())),
            DataType::Boolean => Value::Boolean(raw == "1" || raw.eq_ignore_ascii_case("true")),
            // The SQL API hands timestamps back as epoch seconds with
            // fraction, TZ variants with a trailing offset token.
            t if t.is_timestamp() => http::parse_epoch_seconds(raw)
                .map(Value::Timestamp)
                .unwrap_or_else(|| Value::String(raw.clone())),
            DataType::Bytes => hex::decode(raw)
                .map(Value::Bytes)
                .unwrap_or_else(|_| Value::String(raw.clone())),
            _ => Value::String(raw.clone()),
        }
    }

    fn schema_for(&self, table: &TableRef) -> String {
        table
            .qualifier()
            .map(str::to_string)
            .unwrap_or_else(|| self.schema.clone())
    }
}

#[async_trait]
impl DialectAdapter for SnowflakeAdapter {
    fn kind(&self) -> DialectKind {
        DialectKind::Snowflake
    }

    async fn describe_columns(&self, table: &TableRef) -> Result<Vec<ColumnMeta>, AdapterError> {
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE \
             FROM {}.INFORMATION_SCHEMA.COLUMNS \
             WHERE UPPER(TABLE_NAME) = UPPER('{}') AND UPPER(TABLE_SCHEMA) = UPPER('{}') \
             ORDER BY ORDINAL_POSITION",
            self.database,
            dialect::escape_single_quotes(table.name()),
            dialect::escape_single_quotes(&self.schema_for(table)),
        );
        let result = self.run_statement(&sql).await?;

        if result.rows.is_empty() {
            return Err(AdapterError::NoSuchTable(table.raw().to_string()));
        }

        Ok(result
            .rows
            .into_iter()
            .enumerate()
            .map(|(ordinal, row)| {
                let name = row.first().cloned().flatten().unwrap_or_default();
                let sql_type = row.get(1).cloned().flatten().unwrap_or_default();
                let nullable = row
                    .get(2)
                    .cloned()
                    .flatten()
                    .map(|v| v.eq_ignore_ascii_case("yes"))
                    .unwrap_or(true);
                ColumnMeta::new(name, sql_type, nullable, ordinal)
            })
            .collect())
    }

    async fn discover_key(&self, table: &TableRef) -> Result<KeySpec, AdapterError> {
        let qualified = format!(
            "{}.{}.{}",
            self.database,
            self.schema_for(table),
            table.name()
        );
        let result = self
            .run_statement(&format!("SHOW PRIMARY KEYS IN TABLE {qualified}"))
            .await?;

        let column_idx = result
            .row_type
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case("column_name"));
        let sequence_idx = result
            .row_type
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case("key_sequence"));

        if let (Some(column_idx), Some(sequence_idx)) = (column_idx, sequence_idx) {
            let mut keyed: Vec<(i64, String)> = result
                .rows
                .iter()
                .filter_map(|row| {
                    let name = row.get(column_idx).cloned().flatten()?;
                    let sequence = row
                        .get(sequence_idx)
                        .cloned()
                        .flatten()
                        .and_then(|s| s.parse::<i64>().ok())?;
                    Some((sequence, name))
                })
                .collect();
            keyed.sort_by_key(|(sequence, _)| *sequence);
            if !keyed.is_empty() {
                return Ok(KeySpec::primary_key(
                    keyed.into_iter().map(|(_, name)| name).collect(),
                ));
            }
        }

        let columns = self.describe_columns(table).await?;
        debug!(table = %table, "no primary key found, falling back to column order");
        Ok(KeySpec::column_order(
            columns.into_iter().map(|c| c.name).collect(),
        ))
    }

    async fn estimate_rows(&self, table: &TableRef) -> Result<u64, AdapterError> {
        let sql = format!(
            "SELECT ROW_COUNT FROM {}.INFORMATION_SCHEMA.TABLES \
             WHERE UPPER(TABLE_NAME) = UPPER('{}') AND UPPER(TABLE_SCHEMA) = UPPER('{}')",
            self.database,
            dialect::escape_single_quotes(table.name()),
            dialect::escape_single_quotes(&self.schema_for(table)),
        );
        match self.run_statement(&sql).await {
            Ok(result) => Ok(result
                .rows
                .first()
                .and_then(|row| row.first().cloned().flatten())
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(0)),
            Err(e) => {
                warn!(table = %table, error = %e, "row count unavailable, reporting 0");
                Ok(0)
            }
        }
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Row>, AdapterError> {
        let sql = keyset::build_page_sql(&self.dialect, request);
        debug!(table = %request.table, limit = request.limit, "fetching page");

        let result = self.run_statement(&sql).await?;
        Ok(result
            .rows
            .into_iter()
            .map(|cells| {
                Row::new(
                    request
                        .columns
                        .iter()
                        .enumerate()
                        .map(|(idx, col)| {
                            Self::decode_cell(cells.get(idx).and_then(|c| c.as_ref()), col)
                        })
                        .collect(),
                )
            })
            .collect())
    }

    async fn close(&self) {
        debug!("closing snowflake adapter");
    }
}
