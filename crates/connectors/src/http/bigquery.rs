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
use std::str::FromStr;
use tracing::{debug, warn};

const BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const QUERY_TIMEOUT_MS: u64 = 30_000;

/// BigQuery source over the REST `jobs.query` surface.
pub struct BigQueryAdapter {
    client: RestClient,
    project: String,
    dataset: Option<String>,
    dialect: dialect::BigQuery,
}

impl BigQueryAdapter {
    pub fn new(config: &SourceConfig) -> Result<Self, AdapterError> {
        let project = config.require("project-id", &config.project_id)?;
        let token = http::resolve_token(&config.token, &config.credentials_file)?;
        Ok(BigQueryAdapter {
            client: RestClient::new(token)?,
            project,
            dataset: config.schema.clone().or_else(|| config.database.clone()),
            dialect: dialect::BigQuery,
        })
    }

    fn dataset_for(&self, table: &TableRef) -> Result<String, AdapterError> {
        table
            .qualifier()
            .map(str::to_string)
            .or_else(|| self.dataset.clone())
            .ok_or_else(|| {
                AdapterError::Config("BigQuery table must be qualified as dataset.table".into())
            })
    }

    /// Runs a query and drains every result page.
    async fn run_query(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, AdapterError> {
        let url = format!("{BASE_URL}/projects/{}/queries", self.project);
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_TIMEOUT_MS,
        });

        let mut response = self.client.post_json(&url, &body, &[]).await?;

        let job_id = response["jobReference"]["jobId"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        while !response["jobComplete"].as_bool().unwrap_or(true) {
            let poll_url = format!(
                "{BASE_URL}/projects/{}/queries/{job_id}?timeoutMs={QUERY_TIMEOUT_MS}",
                self.project
            );
            response = self.client.get_json(&poll_url, &[]).await?;
        }

        let mut rows = Self::collect_rows(&response);
        let mut page_token = response["pageToken"].as_str().map(str::to_string);
        while let Some(token) = page_token {
            let page_url = format!(
                "{BASE_URL}/projects/{}/queries/{job_id}?pageToken={token}&timeoutMs={QUERY_TIMEOUT_MS}",
                self.project
            );
            let page = self.client.get_json(&page_url, &[]).await?;
            rows.extend(Self::collect_rows(&page));
            page_token = page["pageToken"].as_str().map(str::to_string);
        }

        Ok(rows)
    }

    fn collect_rows(response: &Json) -> Vec<Vec<Option<String>>> {
        response["rows"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row["f"]
                            .as_array()
                            .map(|cells| {
                                cells.iter().map(|cell| http::cell_text(&cell["v"])).collect()
                            })
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
            // TIMESTAMP arrives as epoch seconds; DATETIME as a naive ISO.
            DataType::TimestampTz => http::parse_epoch_seconds(raw)
                .map(Value::Timestamp)
                .unwrap_or_else(|| Value::String(raw.clone())),
            DataType::Timestamp => http::parse_iso_timestamp(raw)
                .map(Value::Timestamp)
                .unwrap_or_else(|| Value::String(raw.clone())),
            DataType::Bytes => base64::engine::general_purpose::STANDARD
                .decode(raw)
                .map(Value::Bytes)
                .unwrap_or_else(|_| Value::String(raw.clone())),
            _ => Value::String(raw.clone()),
        }
    }
}

#[async_trait]
impl DialectAdapter for BigQueryAdapter {
    fn kind(&self) -> DialectKind {
        DialectKind::BigQuery
    }

    async fn describe_columns(&self, table: &TableRef) -> Result<Vec<ColumnMeta>, AdapterError> {
        let dataset = self.dataset_for(table)?;
        let sql = format!(
            "SELECT column_name, data_type, is_nullable \
             FROM `{dataset}`.INFORMATION_SCHEMA.COLUMNS \
             WHERE table_name = '{}' ORDER BY ordinal_position",
            dialect::escape_single_quotes(table.name())
        );
        let rows = self.run_query(&sql).await?;

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
        let dataset = self.dataset_for(table)?;
        let sql = format!(
            "SELECT column_name \
             FROM `{dataset}`.INFORMATION_SCHEMA.COLUMNS \
             WHERE table_name = '{}' AND clustering_ordinal_position IS NOT NULL \
             ORDER BY clustering_ordinal_position",
            dialect::escape_single_quotes(table.name())
        );
        let rows = self.run_query(&sql).await?;

        let clustering: Vec<String> = rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect();
        if !clustering.is_empty() {
            return Ok(KeySpec::clustering(clustering));
        }

        let columns = self.describe_columns(table).await?;
        debug!(table = %table, "no clustering key found, falling back to column order");
        Ok(KeySpec::column_order(
            columns.into_iter().map(|c| c.name).collect(),
        ))
    }

    async fn estimate_rows(&self, table: &TableRef) -> Result<u64, AdapterError> {
        let dataset = self.dataset_for(table)?;
        let sql = format!(
            "SELECT row_count FROM `{dataset}`.__TABLES__ WHERE table_id = '{}'",
            dialect::escape_single_quotes(table.name())
        );
        match self.run_query(&sql).await {
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

        let rows = self.run_query(&sql).await?;
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
        debug!("closing bigquery adapter");
    }
}
