use crate::core::value::Value;
use crate::pagination::key::KeyTuple;
use serde::{Deserialize, Serialize};

/// One fetched row, values aligned to the job's frozen column list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    pub fn get(&self, ordinal: usize) -> &Value {
        self.values.get(ordinal).unwrap_or(&Value::Null)
    }

    /// Projects the pagination key out of the row.
    ///
    /// `key_ordinals` are indexes into the job's column list, in key order.
    pub fn key(&self, key_ordinals: &[usize]) -> KeyTuple {
        KeyTuple::new(
            key_ordinals
                .iter()
                .map(|&i| self.get(i).clone())
                .collect(),
        )
    }
}
