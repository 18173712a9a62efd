use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("parquet write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow conversion error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("manifest serialization error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("row width {got} does not match {expected} columns")]
    RowWidth { expected: usize, got: usize },

    #[error("sink is closed")]
    Closed,
}
