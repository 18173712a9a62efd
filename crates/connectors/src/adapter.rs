use crate::error::AdapterError;
use async_trait::async_trait;
use model::{
    pagination::key::KeyTuple,
    records::row::Row,
    schema::{column::ColumnMeta, table::TableRef},
};
use serde::{Deserialize, Serialize};

/// Where a discovered pagination key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyOrigin {
    PrimaryKey,
    UniqueIndex,
    ClusteringKey,
    /// Fallback on the table's full column order; total but expensive.
    ColumnOrder,
}

/// Result of pagination-key discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySpec {
    pub columns: Vec<String>,
    /// Whether the source guarantees the tuple identifies a row uniquely.
    pub unique: bool,
    pub origin: KeyOrigin,
}

impl KeySpec {
    pub fn primary_key(columns: Vec<String>) -> Self {
        KeySpec {
            columns,
            unique: true,
            origin: KeyOrigin::PrimaryKey,
        }
    }

    pub fn unique_index(columns: Vec<String>) -> Self {
        KeySpec {
            columns,
            unique: true,
            origin: KeyOrigin::UniqueIndex,
        }
    }

    pub fn clustering(columns: Vec<String>) -> Self {
        KeySpec {
            columns,
            unique: false,
            origin: KeyOrigin::ClusteringKey,
        }
    }

    pub fn column_order(columns: Vec<String>) -> Self {
        KeySpec {
            columns,
            unique: false,
            origin: KeyOrigin::ColumnOrder,
        }
    }
}

/// One page read: rows strictly after `last_key` in `key_columns` order.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub table: TableRef,
    /// Columns to fetch, in output order. May contain synthesized entries
    /// (a physical row id) appended after the table's own columns.
    pub columns: Vec<ColumnMeta>,
    pub key_columns: Vec<String>,
    pub last_key: Option<KeyTuple>,
    /// Opaque predicate, passed through without parsing.
    pub where_clause: Option<String>,
    pub limit: usize,
}

pub struct PageRequestBuilder {
    table: TableRef,
    columns: Vec<ColumnMeta>,
    key_columns: Vec<String>,
    last_key: Option<KeyTuple>,
    where_clause: Option<String>,
    limit: usize,
}

impl PageRequestBuilder {
    pub fn new(table: TableRef) -> Self {
        PageRequestBuilder {
            table,
            columns: Vec::new(),
            key_columns: Vec::new(),
            last_key: None,
            where_clause: None,
            limit: 0,
        }
    }

    pub fn columns(mut self, columns: Vec<ColumnMeta>) -> Self {
        self.columns = columns;
        self
    }

    pub fn key_columns(mut self, key_columns: Vec<String>) -> Self {
        self.key_columns = key_columns;
        self
    }

    pub fn last_key(mut self, last_key: Option<KeyTuple>) -> Self {
        self.last_key = last_key;
        self
    }

    pub fn where_clause(mut self, where_clause: Option<String>) -> Self {
        self.where_clause = where_clause;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn build(self) -> PageRequest {
        PageRequest {
            table: self.table,
            columns: self.columns,
            key_columns: self.key_columns,
            last_key: self.last_key,
            where_clause: self.where_clause,
            limit: self.limit,
        }
    }
}

/// Capability set every source dialect exposes to the engine.
///
/// The engine is source-agnostic: everything dialect-specific lives behind
/// this trait and the adapters decide how each operation maps onto their
/// driver or API.
#[async_trait]
pub trait DialectAdapter: Send + Sync {
    fn kind(&self) -> crate::DialectKind;

    /// Ordered column descriptors; ordinal-stable across calls in a job.
    async fn describe_columns(&self, table: &TableRef) -> Result<Vec<ColumnMeta>, AdapterError>;

    /// Pagination-key discovery: primary key, then unique index, then
    /// clustering key, then full column order.
    async fn discover_key(&self, table: &TableRef) -> Result<KeySpec, AdapterError>;

    /// Row-count estimate; exact on small tables, approximate allowed above
    /// the dialect's threshold. Soft-fails to 0 when unavailable.
    async fn estimate_rows(&self, table: &TableRef) -> Result<u64, AdapterError>;

    /// Fetches one key-ordered page; at most `request.limit` rows, each
    /// aligned to `request.columns`.
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Row>, AdapterError>;

    /// Physical row identifier usable as an ordering tiebreaker, if the
    /// source has one. The ordinal is assigned by the caller.
    fn row_id_column(&self) -> Option<ColumnMeta> {
        None
    }

    /// Releases driver resources; idempotent, never fails observably.
    async fn close(&self);
}
