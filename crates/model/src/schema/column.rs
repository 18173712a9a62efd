use crate::core::data_type::DataType;
use serde::{Deserialize, Serialize};

/// Descriptor of one source column, ordinal-stable within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Source type label, kept verbatim for logs and reports.
    pub sql_type: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub ordinal: usize,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>, nullable: bool, ordinal: usize) -> Self {
        let sql_type = sql_type.into();
        let data_type = DataType::parse(&sql_type);
        ColumnMeta {
            name: name.into(),
            sql_type,
            data_type,
            nullable,
            ordinal,
        }
    }
}
