use connectors::SourceConfig;
use model::schema::table::TableRef;
use sha2::{Digest, Sha256};
use sink::SinkFormat;
use std::path::PathBuf;

/// One "dump this table" request.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub source: SourceConfig,
    pub table: TableRef,
    pub output: PathBuf,
    pub format: SinkFormat,
    pub batch_size: usize,
    pub where_clause: Option<String>,
    pub key_columns: Option<Vec<String>>,
}

impl JobSpec {
    /// Deterministic job id over (source identity, table, output path).
    ///
    /// Stable across restarts so a resumed run finds its own checkpoint;
    /// hex, so it is file-name and object-name safe as-is.
    pub fn job_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.identity().as_bytes());
        hasher.update(b"|");
        hasher.update(self.table.raw().as_bytes());
        hasher.update(b"|");
        hasher.update(self.output.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::DialectKind;

    fn spec(table: &str, output: &str) -> JobSpec {
        JobSpec {
            source: SourceConfig {
                kind: Some(DialectKind::Postgres),
                host: Some("db.example".into()),
                port: Some(5432),
                database: Some("app".into()),
                ..SourceConfig::default()
            },
            table: TableRef::new(table),
            output: PathBuf::from(output),
            format: SinkFormat::Csv,
            batch_size: 1000,
            where_clause: None,
            key_columns: None,
        }
    }

    #[test]
    fn job_id_is_stable() {
        assert_eq!(
            spec("public.users", "/tmp/u.csv").job_id(),
            spec("public.users", "/tmp/u.csv").job_id()
        );
    }

    #[test]
    fn job_id_distinguishes_outputs() {
        // Same table to different outputs extracts concurrently.
        assert_ne!(
            spec("public.users", "/tmp/a.csv").job_id(),
            spec("public.users", "/tmp/b.csv").job_id()
        );
    }

    #[test]
    fn job_id_is_url_safe_hex() {
        let id = spec("public.users", "/tmp/u.csv").job_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
