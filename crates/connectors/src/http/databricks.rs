use crate::{
    adapter::{DialectAdapter, KeySpec, PageRequest},
    error::AdapterError,
    http::{self, RestClient},
    sql::{dialect, keyset},
    DialectKind, SourceConfig,
};
use async_trait::async_trait;
use base64::Engine as _;
use bigdecimal::BigDecimal;
use model::{
    core::{data_type::DataType, value::Value},
    records::row::Row,
    schema::{column::ColumnMeta, table::TableRef},
};
use serde_json::{json, Value as Json};
use std::{str::FromStr, time::Duration};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLLS: usize = 120;

/// Databricks source over the SQL Statement Execution API.
pub struct DatabricksAdapter {
    client: RestClient,
    base_url: String,
    warehouse_id: String,
    catalog: String,
    schema: Option<String>,
    dialect: dialect::Databricks,
}

impl DatabricksAdapter {
    pub fn new(config: &SourceConfig) -> Result<Self, AdapterError> {
        let workspace = config.require("workspace", &config.workspace)?;
        let token = http::resolve_token(&config.token, &config.credentials_file)?;
        Ok(DatabricksAdapter {
            client: RestClient::new(token)?,
            base_url: workspace.trim_end_matches('/').to_string(),
            warehouse_id: config.require("warehouse", &config.warehouse)?,
            catalog: config.require("catalog", &config.catalog)?,
            schema: config.schema.clone(),
            dialect: dialect::Databricks,
        })
    }

    async fn run_statement(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, AdapterError> {
        let url = format!("{}/api/2.0/sql/statements/", self.base_url);
        let mut body = json!({
            "statement": sql,
            "warehouse_id": self.warehouse_id,
            "wait_timeout": "30s",
            "on_wait_timeout": "CONTINUE",
            "format": "JSON_ARRAY",
            "disposition": "INLINE",
            "catalog": self.catalog,
        });
        if let Some(schema) = &self.schema {
            body["schema"] = Json::String(schema.clone());
        }

        let mut response = self.client.post_json(&url, &body, &[]).await?;

        let mut polls = 0;
        loop {
            match response["status"]["state"].as_str().unwrap_or_default() {
                "SUCCEEDED" => break,
                "PENDING" | "RUNNING" => {
                    if polls >= MAX_POLLS {
                        return Err(AdapterError::fetch_retryable(
                            "statement polling timed out",
                        ));
                    }
                    polls += 1;
                    tokio::time::sleep(POLL_INTERVAL).await;
                    let statement_id = response["statement_id"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    let poll_url =
                        format!("{}/api/2.0/sql/statements/{statement_id}", self.base_url);
                    response = self.client.get_json(&poll_url, &[]).await?;
                }
                "FAILED" | "CANCELED" | "CLOSED" => {
                    let message = response["status"]["error"]["message"]
                        .as_str()
                        .unwrap_or("statement failed")
                        .to_string();
                    return Err(Self::classify_failure(message));
                }
                other => {
                    return Err(AdapterError::fetch_retryable(format!(
                        "unexpected statement state: {other}"
                    )))
                }
            }
        }

        let mut rows = Self::collect_rows(&response["result"]["data_array"]);
        let mut next = response["result"]["next_chunk_internal_link"]
            .as_str()
            .map(str::to_string);
        while let Some(link) = next {
            let chunk = self
                .client
                .get_json(&format!("{}{link}", self.base_url), &[])
                .await?;
            rows.extend(Self::collect_rows(&chunk["data_array"]));
            next = chunk["next_chunk_internal_link"].as_str().map(str::to_string);
        }

        Ok(rows)
    }

    fn classify_failure(message: String) -> AdapterError {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("table or view not found") || lowered.contains("table_or_view_not_found")
        {
            AdapterError::fetch_permanent(message)
        } else if lowered.contains("permission") || lowered.contains("access denied") {
            AdapterError::PermissionDenied(message)
        } else {
            AdapterError::fetch_retryable(message)
        }
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
            DataType::Boolean => Value::Boolean(raw.eq_ignore_ascii_case("true")),
            t if t.is_timestamp() => http::parse_iso_timestamp(raw)
                .map(Value::Timestamp)
                .unwrap_or_else(|| Value::String(raw.clone())),
            DataType::Bytes => base64::engine::general_purpose::STANDARD
                .decode(raw)
                .map(Value::Bytes)
                .unwrap_or_else(|_| Value::String(raw.clone())),
            _ => Value::String(raw.clone()),
        }
    }

    fn schema_for(&self, table: &TableRef) -> Result<String, AdapterError> {
        table
            .qualifier()
            .map(|q| q.rsplit('.').next().unwrap_or(q).to_string())
            .or_else(|| self.schema.clone())
            .ok_or_else(|| {
                AdapterError::Config(
                    "Databricks table must be qualified as schema.table".into(),
                )
            })
    }
}

#[async_trait]
impl DialectAdapter for DatabricksAdapter {
    fn kind(&self) -> DialectKind {
        DialectKind::Databricks
    }

    async fn describe_columns(&self, table: &TableRef) -> Result<Vec<ColumnMeta>, AdapterError> {
        let schema = self.schema_for(table)?;
        let sql = format!(
            "SELECT column_name, data_type, is_nullable \
             FROM {}.information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}' \
             ORDER BY ordinal_position",
            self.catalog,
            dialect::escape_single_quotes(&schema),
            dialect::escape_single_quotes(table.name()),
        );
        let rows = self.run_statement(&sql).await?;

        if rows.is_empty() {
            return Err(AdapterError::NoSuchTable(table.raw().to_string()));
        }

        Ok(rows
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
        let schema = self.schema_for(table)?;
        let sql = format!(
            "SELECT kcu.column_name \
             FROM {catalog}.information_schema.table_constraints tc \
             JOIN {catalog}.information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
              AND tc.table_name = kcu.table_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = '{schema}' AND tc.table_name = '{name}' \
             ORDER BY kcu.ordinal_position",
            catalog = self.catalog,
            schema = dialect::escape_single_quotes(&schema),
            name = dialect::escape_single_quotes(table.name()),
        );
        let rows = self.run_statement(&sql).await?;

        let pk: Vec<String> = rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect();
        if !pk.is_empty() {
            return Ok(KeySpec::primary_key(pk));
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
        match self
            .run_statement(&format!("SELECT COUNT(*) FROM {quoted}"))
            .await
        {
            Ok(rows) => Ok(rows
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

        let rows = self.run_statement(&sql).await?;
        Ok(rows
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
        debug!("closing databricks adapter");
    }
}
