use crate::error::CliError;
use clap::Parser;
use connectors::{DialectKind, SourceConfig};
use engine::{EngineConfig, ExtractReport, Extractor, JobSpec};
use model::schema::table::TableRef;
use sink::SinkFormat;
use state::StateBackend;
use std::{path::PathBuf, process, str::FromStr};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

mod error;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "sqlextract",
    version,
    about = "Extract SQL tables to CSV or Parquet files with resumable checkpoints"
)]
struct Cli {
    /// Database type (postgres, mssql, bigquery, snowflake, databricks, duckdb)
    #[arg(long = "type", value_name = "TYPE")]
    db_type: String,

    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    password: Option<String>,
    /// Database name, or the database file path for DuckDB
    #[arg(long)]
    database: Option<String>,
    #[arg(long)]
    schema: Option<String>,

    /// Google Cloud project id (BigQuery)
    #[arg(long = "project-id")]
    project_id: Option<String>,
    /// File holding the API token (BigQuery, Snowflake, Databricks)
    #[arg(long = "credentials-file")]
    credentials_file: Option<String>,

    /// Snowflake account identifier
    #[arg(long)]
    account: Option<String>,
    /// Snowflake warehouse name, or Databricks warehouse id
    #[arg(long)]
    warehouse: Option<String>,
    /// Snowflake role name
    #[arg(long)]
    role: Option<String>,

    /// Databricks workspace URL
    #[arg(long)]
    workspace: Option<String>,
    /// API access token
    #[arg(long)]
    token: Option<String>,
    /// Databricks catalog name
    #[arg(long)]
    catalog: Option<String>,

    /// Qualified table name to extract
    #[arg(long)]
    table: String,
    /// Output file path
    #[arg(long)]
    output: PathBuf,
    /// Output format (csv or parquet)
    #[arg(long, default_value = "csv")]
    format: String,
    /// Rows per page read
    #[arg(long = "batch-size", default_value_t = 1000)]
    batch_size: usize,
    /// Opaque SQL predicate applied to the extraction
    #[arg(long = "where")]
    where_clause: Option<String>,
    /// Comma-separated key columns overriding discovery
    #[arg(long = "key-columns")]
    key_columns: Option<String>,

    /// State backend (memory, file, kubernetes)
    #[arg(long = "state-manager", default_value = "memory")]
    state_manager: String,
    /// Directory for the file state backend
    #[arg(long = "state-dir", default_value = ".sqlextract-state")]
    state_dir: PathBuf,
    /// Kubernetes namespace for the kubernetes state backend
    #[arg(long)]
    namespace: Option<String>,
}

impl Cli {
    fn source_config(&self, kind: DialectKind) -> SourceConfig {
        SourceConfig {
            kind: Some(kind),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            schema: self.schema.clone(),
            project_id: self.project_id.clone(),
            credentials_file: self.credentials_file.clone(),
            account: self.account.clone(),
            warehouse: self.warehouse.clone(),
            role: self.role.clone(),
            workspace: self.workspace.clone(),
            token: self.token.clone(),
            catalog: self.catalog.clone(),
        }
    }

    /// Dialect-specific required options, checked before any I/O.
    fn validate(&self, kind: DialectKind) -> Result<(), CliError> {
        let require = |name: &str, present: bool| {
            if present {
                Ok(())
            } else {
                Err(CliError::Config(format!(
                    "--{name} is required for {kind}"
                )))
            }
        };

        match kind {
            DialectKind::Postgres | DialectKind::SqlServer => {
                require("host", self.host.is_some())?;
                require("port", self.port.is_some())?;
                require("user", self.user.is_some())?;
                require("password", self.password.is_some())?;
                require("database", self.database.is_some())
            }
            DialectKind::BigQuery => require("project-id", self.project_id.is_some()),
            DialectKind::Snowflake => {
                require("account", self.account.is_some())?;
                require("warehouse", self.warehouse.is_some())?;
                require("role", self.role.is_some())?;
                require("user", self.user.is_some())?;
                require("database", self.database.is_some())
            }
            DialectKind::Databricks => {
                require("workspace", self.workspace.is_some())?;
                require("token", self.token.is_some())?;
                require("catalog", self.catalog.is_some())
            }
            DialectKind::DuckDb => require("database", self.database.is_some()),
        }
    }

    fn state_backend(&self) -> Result<StateBackend, CliError> {
        match self.state_manager.to_ascii_lowercase().as_str() {
            "memory" => Ok(StateBackend::Memory),
            "file" => Ok(StateBackend::File {
                root: self.state_dir.clone(),
            }),
            "kubernetes" => {
                let namespace = self.namespace.clone().ok_or_else(|| {
                    CliError::Config(
                        "--namespace is required when --state-manager is kubernetes".into(),
                    )
                })?;
                Ok(StateBackend::Kubernetes { namespace })
            }
            other => Err(CliError::Config(format!(
                "unsupported state manager: {other}"
            ))),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let exit_code = match run_cli().await {
        Ok(report) => {
            if report.already_complete {
                info!(
                    job_id = %report.job_id,
                    rows = report.processed_rows,
                    "job already completed, nothing to do"
                );
            } else {
                info!(
                    job_id = %report.job_id,
                    rows_written = report.rows_written,
                    total_rows = report.processed_rows,
                    resumed = report.resumed,
                    "extraction completed successfully"
                );
            }
            0
        }
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    };

    process::exit(exit_code);
}

async fn run_cli() -> Result<ExtractReport, CliError> {
    let cli = Cli::parse();

    let kind = DialectKind::from_str(&cli.db_type)
        .map_err(|e| CliError::Config(e.to_string()))?;
    cli.validate(kind)?;

    let format = SinkFormat::from_str(&cli.format).map_err(CliError::Config)?;
    if cli.batch_size == 0 {
        return Err(CliError::Config("--batch-size must be positive".into()));
    }

    let backend = cli.state_backend()?;
    let store = state::open(&backend).await?;

    let spec = JobSpec {
        source: cli.source_config(kind),
        table: TableRef::new(cli.table.clone()),
        output: cli.output.clone(),
        format,
        batch_size: cli.batch_size,
        where_clause: cli.where_clause.clone(),
        key_columns: cli.key_columns.as_ref().map(|raw| {
            raw.split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        }),
    };

    let cancel = CancellationToken::new();
    shutdown::register_handlers(cancel.clone());

    info!(
        table = %spec.table,
        output = %spec.output.display(),
        format = %cli.format,
        "starting extraction"
    );

    let extractor = Extractor::new(spec, store, EngineConfig::default());
    Ok(extractor.extract(cancel).await?)
}
