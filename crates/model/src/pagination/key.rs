use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Ordered tuple of pagination-key values for one row.
///
/// `None` as a checkpoint key means "before the first row"; a stored tuple
/// means every row up to and including it has been flushed to the sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyTuple(pub Vec<Value>);

impl KeyTuple {
    pub fn new(values: Vec<Value>) -> Self {
        KeyTuple(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lexicographic comparison over the component values.
    ///
    /// Returns `None` when two components carry incomparable tags, which
    /// indicates a key column changed type between runs.
    pub fn compare(&self, other: &KeyTuple) -> Option<Ordering> {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.compare(b)? {
                Ordering::Equal => continue,
                non_eq => return Some(non_eq),
            }
        }
        Some(self.0.len().cmp(&other.0.len()))
    }
}

impl fmt::Display for KeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_lexicographically() {
        let a = KeyTuple::new(vec![Value::Int(1), Value::String("b".into())]);
        let b = KeyTuple::new(vec![Value::Int(1), Value::String("c".into())]);
        let c = KeyTuple::new(vec![Value::Int(2), Value::String("a".into())]);
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(b.compare(&c), Some(Ordering::Less));
        assert_eq!(a.compare(&a), Some(Ordering::Equal));
    }

    #[test]
    fn shorter_prefix_sorts_first() {
        let a = KeyTuple::new(vec![Value::Int(1)]);
        let b = KeyTuple::new(vec![Value::Int(1), Value::Int(0)]);
        assert_eq!(a.compare(&b), Some(Ordering::Less));
    }
}
