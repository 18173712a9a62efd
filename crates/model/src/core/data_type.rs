use serde::{Deserialize, Serialize};

/// Rendering hint derived from the source column type.
///
/// The engine treats the source type as an opaque label; this enum only
/// decides how a cell is decoded, tagged and later rendered by a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Decimal,
    Boolean,
    /// Timestamp without zone; treated as UTC.
    Timestamp,
    TimestampTz,
    Date,
    Bytes,
    Text,
}

impl DataType {
    /// Maps a source-reported type name onto a rendering hint.
    ///
    /// Accepts the spellings used by all supported dialects; anything
    /// unrecognized degrades to `Text`, which keeps the extraction faithful
    /// if not columnar-typed.
    pub fn parse(sql_type: &str) -> DataType {
        let normalized = sql_type
            .split('(')
            .next()
            .unwrap_or(sql_type)
            .trim()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "int2" | "smallint" | "tinyint" => DataType::SmallInt,
            "int4" | "int" | "integer" | "int32" | "mediumint" => DataType::Int,
            "int8" | "bigint" | "int64" | "long" | "serial8" | "bigserial" | "hugeint" => {
                DataType::BigInt
            }
            "float4" | "real" | "float32" => DataType::Real,
            "float8" | "double" | "double precision" | "float" | "float64" => DataType::Double,
            "numeric" | "decimal" | "number" | "bignumeric" | "money" => DataType::Decimal,
            "bool" | "boolean" | "bit" => DataType::Boolean,
            "timestamp"
            | "datetime"
            | "datetime2"
            | "smalldatetime"
            | "timestamp_ntz"
            | "timestamp without time zone" => DataType::Timestamp,
            "timestamptz"
            | "timestamp_tz"
            | "timestamp_ltz"
            | "datetimeoffset"
            | "timestamp with time zone" => DataType::TimestampTz,
            "date" => DataType::Date,
            "bytea" | "binary" | "varbinary" | "blob" | "bytes" | "image" => DataType::Bytes,
            _ => DataType::Text,
        }
    }

    /// True for types the page SELECT casts to text so the driver hands the
    /// value over in its lossless string form.
    pub fn fetched_as_text(&self) -> bool {
        matches!(self, DataType::Decimal | DataType::Date)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::SmallInt | DataType::Int | DataType::BigInt)
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, DataType::Real | DataType::Double)
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, DataType::Timestamp | DataType::TimestampTz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parenthesized_types() {
        assert_eq!(DataType::parse("numeric(10,2)"), DataType::Decimal);
        assert_eq!(DataType::parse("VARCHAR(255)"), DataType::Text);
    }

    #[test]
    fn parses_dialect_spellings() {
        assert_eq!(DataType::parse("INT64"), DataType::BigInt);
        assert_eq!(DataType::parse("timestamp_ntz"), DataType::Timestamp);
        assert_eq!(DataType::parse("datetimeoffset"), DataType::TimestampTz);
        assert_eq!(DataType::parse("bytea"), DataType::Bytes);
    }

    #[test]
    fn unknown_type_falls_back_to_text() {
        assert_eq!(DataType::parse("geography"), DataType::Text);
    }
}
