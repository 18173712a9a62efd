use crate::core::data_type::DataType;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

/// A scalar cell as handed over by a dialect adapter.
///
/// Adapters own lossless tagging; sinks own rendering. Decimals are carried
/// as `BigDecimal` and always rendered as their string form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    String(String),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::BigInt,
            Value::Float(_) => DataType::Double,
            Value::Decimal(_) => DataType::Decimal,
            Value::Boolean(_) => DataType::Boolean,
            Value::Timestamp(_) => DataType::TimestampTz,
            Value::Bytes(_) => DataType::Bytes,
            Value::String(_) => DataType::Text,
            Value::Null => DataType::Text,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Decimal(v) => v.to_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Decimal(v) => v.to_f64(),
            _ => None,
        }
    }

    /// Plain text form used by the CSV sink and in log output.
    ///
    /// Bytes render as lowercase hex; timestamps as RFC 3339 with
    /// microsecond precision in UTC. `Null` has no text form and must be
    /// handled by the caller.
    pub fn render_text(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Boolean(v) => v.to_string(),
            Value::Timestamp(v) => v.to_rfc3339_opts(SecondsFormat::Micros, true),
            Value::Bytes(v) => hex::encode(v),
            Value::String(v) => v.clone(),
            Value::Null => String::new(),
        }
    }

    /// Total-enough ordering for pagination keys.
    ///
    /// Values of the same tag compare naturally; the numeric tags compare
    /// across each other through `f64`/`i64` widening. Mixed non-numeric
    /// tags do not compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Decimal(a), Decimal(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (String(a), String(b)) => Some(a.cmp(b)),
            (Bytes(a), Bytes(b)) => Some(a.cmp(b)),
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) => Some(Ordering::Less),
            (_, Null) => Some(Ordering::Greater),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            other => write!(f, "{}", other.render_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn renders_timestamp_with_micros() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T10:20:30.000123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            Value::Timestamp(ts).render_text(),
            "2024-05-01T10:20:30.000123Z"
        );
    }

    #[test]
    fn decimal_renders_as_string() {
        let d = BigDecimal::from_str("123456789.000000001").unwrap();
        assert_eq!(Value::Decimal(d).render_text(), "123456789.000000001");
    }

    #[test]
    fn compares_across_numeric_tags() {
        let d = BigDecimal::from_str("2.5").unwrap();
        assert_eq!(
            Value::Int(2).compare(&Value::Decimal(d)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn null_sorts_first() {
        assert_eq!(
            Value::Null.compare(&Value::Int(i64::MIN)),
            Some(Ordering::Less)
        );
    }
}
