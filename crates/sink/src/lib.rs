pub mod csv_sink;
pub mod error;
pub mod parquet_sink;

use crate::error::SinkError;
use model::{core::value::Value, schema::column::ColumnMeta};
use std::path::Path;

/// Output format of one extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    Csv,
    Parquet,
}

impl std::str::FromStr for SinkFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(SinkFormat::Csv),
            "parquet" => Ok(SinkFormat::Parquet),
            other => Err(format!("unsupported format: {other}")),
        }
    }
}

/// Whether a sink starts a fresh artifact or continues a previous run's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Create,
    Append,
}

/// Sink-level options; defaults match the documented envelopes.
#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// CSV rendition of NULL cells.
    pub null_literal: String,
    /// Stage one Parquet file per flushed batch (with a manifest) instead
    /// of a single directly-written file. Required for resumable Parquet
    /// jobs; append mode always stages.
    pub stage_batches: bool,
}

impl Default for SinkOptions {
    fn default() -> Self {
        SinkOptions {
            null_literal: "NULL".to_string(),
            stage_batches: true,
        }
    }
}

/// Streaming writer for one output artifact.
///
/// Rows arrive in engine order and must land in that order; `flush`
/// durably commits everything written so far and is the engine's
/// checkpoint boundary.
pub trait SinkWriter: Send {
    /// Emits the column-name header. Called exactly once, only in create
    /// mode, and only by formats that carry one.
    fn write_header(&mut self) -> Result<(), SinkError>;

    /// Appends one row; `values` is aligned to the open columns.
    fn write_row(&mut self, values: &[Value]) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError>;

    /// Finalizes the artifact envelope; idempotent.
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Opens the sink for `format` at `path`.
pub fn open_sink(
    format: SinkFormat,
    path: &Path,
    columns: &[ColumnMeta],
    mode: OpenMode,
    options: &SinkOptions,
) -> Result<Box<dyn SinkWriter>, SinkError> {
    match format {
        SinkFormat::Csv => Ok(Box::new(csv_sink::CsvSink::open(
            path,
            columns,
            mode,
            options.null_literal.clone(),
        )?)),
        SinkFormat::Parquet => Ok(Box::new(parquet_sink::ParquetSink::open(
            path, columns, mode, options,
        )?)),
    }
}
