use model::{
    core::{data_type::DataType, value::Value},
    schema::column::ColumnMeta,
};

/// Escapes a string for embedding in a single-quoted SQL literal.
pub(crate) fn escape_single_quotes(s: &str) -> String {
    s.replace('\'', "''")
}

fn is_native_text(sql_type: &str) -> bool {
    let t = sql_type.to_ascii_lowercase();
    t.contains("char") || t == "text" || t == "string" || t == "name"
}

/// Source-specific SQL surface used by the shared page-query generator.
///
/// Dialects only describe spelling: quoting, literal syntax, limit style
/// and whether row-tuple comparison is available. Query assembly lives in
/// [`crate::sql::keyset`].
pub trait SqlDialect: Send + Sync {
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Whether `(k1, k2) > (v1, v2)` is valid keyset syntax. Dialects
    /// without it get the OR-of-tuples expansion.
    fn supports_row_tuple_comparison(&self) -> bool {
        false
    }

    /// Trailing limit clause, e.g. `LIMIT 1000`.
    fn limit_clause(&self, limit: usize) -> String {
        format!("LIMIT {limit}")
    }

    /// Select-list expression for one column.
    ///
    /// Decimals, dates and non-native text types are cast to the dialect's
    /// text type so each driver hands values back in their lossless string
    /// form.
    fn select_expr(&self, col: &ColumnMeta) -> String {
        let ident = self.quote_ident(&col.name);
        let needs_cast = col.data_type.fetched_as_text()
            || (col.data_type == DataType::Text && !is_native_text(&col.sql_type));
        if needs_cast {
            format!("{} AS {ident}", self.cast_text(&ident))
        } else {
            ident
        }
    }

    fn cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS TEXT)")
    }

    fn render_boolean(&self, value: bool) -> String {
        let literal = if value { "TRUE" } else { "FALSE" };
        literal.to_string()
    }

    fn render_timestamp(&self, ts: &chrono::DateTime<chrono::Utc>) -> String {
        format!(
            "'{}'",
            ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
        )
    }

    fn render_bytes(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex::encode(bytes))
    }

    /// Renders a tagged scalar as a SQL literal for keyset predicates.
    fn render_literal(&self, value: &Value) -> String {
        match value {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Boolean(v) => self.render_boolean(*v),
            Value::Timestamp(v) => self.render_timestamp(v),
            Value::Bytes(v) => self.render_bytes(v),
            Value::String(v) => format!("'{}'", escape_single_quotes(v)),
            Value::Null => "NULL".to_string(),
        }
    }
}

pub struct Postgres;

impl SqlDialect for Postgres {
    fn supports_row_tuple_comparison(&self) -> bool {
        true
    }

    fn render_bytes(&self, bytes: &[u8]) -> String {
        format!("'\\x{}'", hex::encode(bytes))
    }
}

pub struct SqlServer;

impl SqlDialect for SqlServer {
    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn limit_clause(&self, limit: usize) -> String {
        format!("OFFSET 0 ROWS FETCH NEXT {limit} ROWS ONLY")
    }

    fn cast_text(&self, expr: &str) -> String {
        format!("CONVERT(VARCHAR(MAX), {expr})")
    }

    fn render_boolean(&self, value: bool) -> String {
        let literal = if value { "1" } else { "0" };
        literal.to_string()
    }

    fn render_timestamp(&self, ts: &chrono::DateTime<chrono::Utc>) -> String {
        // datetime2 literals take no zone suffix.
        format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.6f"))
    }

    fn render_bytes(&self, bytes: &[u8]) -> String {
        format!("0x{}", hex::encode(bytes))
    }
}

pub struct BigQuery;

impl SqlDialect for BigQuery {
    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "\\`"))
    }

    fn cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS STRING)")
    }

    fn render_timestamp(&self, ts: &chrono::DateTime<chrono::Utc>) -> String {
        format!(
            "TIMESTAMP '{}'",
            ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
        )
    }

    fn render_bytes(&self, bytes: &[u8]) -> String {
        format!("FROM_HEX('{}')", hex::encode(bytes))
    }
}

pub struct Snowflake;

impl SqlDialect for Snowflake {
    fn cast_text(&self, expr: &str) -> String {
        format!("TO_VARCHAR({expr})")
    }

    fn render_timestamp(&self, ts: &chrono::DateTime<chrono::Utc>) -> String {
        format!(
            "'{}'::TIMESTAMP_TZ",
            ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
        )
    }

    fn render_bytes(&self, bytes: &[u8]) -> String {
        format!("TO_BINARY('{}')", hex::encode(bytes))
    }
}

pub struct Databricks;

impl SqlDialect for Databricks {
    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS STRING)")
    }

    fn render_timestamp(&self, ts: &chrono::DateTime<chrono::Utc>) -> String {
        format!(
            "TIMESTAMP '{}'",
            ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
        )
    }
}

pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn supports_row_tuple_comparison(&self) -> bool {
        true
    }

    fn cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS VARCHAR)")
    }

    fn render_bytes(&self, bytes: &[u8]) -> String {
        format!("'\\x{}'::BLOB", hex::encode(bytes))
    }
}
