pub mod adapter;
pub mod error;
pub mod http;
pub mod sql;

use crate::{adapter::DialectAdapter, error::AdapterError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported source dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialectKind {
    Postgres,
    SqlServer,
    BigQuery,
    Snowflake,
    Databricks,
    DuckDb,
}

impl DialectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialectKind::Postgres => "postgres",
            DialectKind::SqlServer => "mssql",
            DialectKind::BigQuery => "bigquery",
            DialectKind::Snowflake => "snowflake",
            DialectKind::Databricks => "databricks",
            DialectKind::DuckDb => "duckdb",
        }
    }
}

impl std::str::FromStr for DialectKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DialectKind::Postgres),
            "mssql" | "sqlserver" => Ok(DialectKind::SqlServer),
            "bigquery" => Ok(DialectKind::BigQuery),
            "snowflake" => Ok(DialectKind::Snowflake),
            "databricks" => Ok(DialectKind::Databricks),
            "duckdb" => Ok(DialectKind::DuckDb),
            other => Err(AdapterError::Config(format!(
                "unsupported database type: {other}"
            ))),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings, passed opaquely from the command line.
///
/// Which fields matter depends on the dialect; validation happens in the
/// CLI before an adapter is opened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: Option<DialectKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    // BigQuery
    pub project_id: Option<String>,
    pub credentials_file: Option<String>,
    // Snowflake
    pub account: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    // Databricks
    pub workspace: Option<String>,
    pub token: Option<String>,
    pub catalog: Option<String>,
}

impl SourceConfig {
    /// Stable identity string for job-id derivation. Never includes
    /// credentials.
    pub fn identity(&self) -> String {
        let kind = self
            .kind
            .map(|k| k.as_str().to_string())
            .unwrap_or_default();
        let endpoint = self
            .host
            .clone()
            .or_else(|| self.account.clone())
            .or_else(|| self.project_id.clone())
            .or_else(|| self.workspace.clone())
            .unwrap_or_default();
        let port = self.port.map(|p| p.to_string()).unwrap_or_default();
        let database = self.database.clone().unwrap_or_default();
        let catalog = self.catalog.clone().unwrap_or_default();
        format!("{kind}://{endpoint}:{port}/{database}/{catalog}")
    }

    pub fn require(&self, field: &str, value: &Option<String>) -> Result<String, AdapterError> {
        value
            .clone()
            .ok_or_else(|| AdapterError::Config(format!("missing required option: {field}")))
    }
}

/// Opens an adapter for the configured dialect.
///
/// Connection setup may be lazy inside an adapter; unreachable sources and
/// bad credentials surface as [`AdapterError::Connect`] here or on the
/// first call.
pub async fn open(config: &SourceConfig) -> Result<Box<dyn DialectAdapter>, AdapterError> {
    let kind = config
        .kind
        .ok_or_else(|| AdapterError::Config("missing required option: type".into()))?;

    match kind {
        DialectKind::Postgres => Ok(Box::new(
            sql::postgres::PostgresAdapter::connect(config).await?,
        )),
        DialectKind::SqlServer => Ok(Box::new(
            sql::mssql::SqlServerAdapter::connect(config).await?,
        )),
        DialectKind::DuckDb => Ok(Box::new(sql::duckdb::DuckDbAdapter::open(config).await?)),
        DialectKind::BigQuery => Ok(Box::new(http::bigquery::BigQueryAdapter::new(config)?)),
        DialectKind::Snowflake => Ok(Box::new(http::snowflake::SnowflakeAdapter::new(config)?)),
        DialectKind::Databricks => Ok(Box::new(http::databricks::DatabricksAdapter::new(
            config,
        )?)),
    }
}
