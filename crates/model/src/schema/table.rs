use serde::{Deserialize, Serialize};
use std::fmt;

/// Qualified table name as passed on the command line.
///
/// Stored verbatim; dialects split on `.` to quote each part, so
/// `schema.table`, `dataset.table` and `catalog.schema.table` all work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    raw: String,
}

impl TableRef {
    pub fn new(raw: impl Into<String>) -> Self {
        TableRef { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.raw.split('.')
    }

    /// Unqualified table name (last path segment).
    pub fn name(&self) -> &str {
        self.raw.rsplit('.').next().unwrap_or(&self.raw)
    }

    /// Leading qualifier, if any (`schema` in `schema.table`).
    pub fn qualifier(&self) -> Option<&str> {
        self.raw.rsplit_once('.').map(|(q, _)| q)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for TableRef {
    fn from(raw: &str) -> Self {
        TableRef::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_qualified_names() {
        let t = TableRef::new("analytics.events");
        assert_eq!(t.name(), "events");
        assert_eq!(t.qualifier(), Some("analytics"));
        assert_eq!(t.parts().count(), 2);
    }

    #[test]
    fn bare_name_has_no_qualifier() {
        let t = TableRef::new("users");
        assert_eq!(t.name(), "users");
        assert_eq!(t.qualifier(), None);
    }
}
