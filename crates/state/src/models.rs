use chrono::{DateTime, Utc};
use model::pagination::key::KeyTuple;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Legal transitions: `pending → running`,
    /// `running → {completed, failed}`, `failed → running` on retry.
    pub fn may_transition(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Running, Completed) | (Running, Failed) | (Failed, Running)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Durable record of one extraction job's progress.
///
/// `last_key` only ever names a row that has been flushed to the sink;
/// `processed_rows` counts the rows up to and including it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub job_id: String,
    pub table: String,
    pub status: JobStatus,
    pub last_key: Option<KeyTuple>,
    pub processed_rows: u64,
    pub total_rows_estimate: u64,
    pub last_updated: DateTime<Utc>,
    pub error: Option<String>,
}

impl Checkpoint {
    pub fn new(job_id: impl Into<String>, table: impl Into<String>) -> Self {
        Checkpoint {
            job_id: job_id.into(),
            table: table.into(),
            status: JobStatus::Pending,
            last_key: None,
            processed_rows: 0,
            total_rows_estimate: 0,
            last_updated: Utc::now(),
            error: None,
        }
    }

    /// Advances `last_updated`, keeping it monotonic even under clock skew.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_updated = if now > self.last_updated {
            now
        } else {
            self.last_updated + chrono::Duration::microseconds(1)
        };
    }
}

/// File-name / object-name safe rendition of a job id.
pub fn url_safe(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_state_machine() {
        assert!(JobStatus::Pending.may_transition(JobStatus::Running));
        assert!(JobStatus::Running.may_transition(JobStatus::Completed));
        assert!(JobStatus::Running.may_transition(JobStatus::Failed));
        assert!(JobStatus::Failed.may_transition(JobStatus::Running));
        assert!(!JobStatus::Completed.may_transition(JobStatus::Running));
        assert!(!JobStatus::Pending.may_transition(JobStatus::Completed));
    }

    #[test]
    fn touch_is_monotonic() {
        let mut cp = Checkpoint::new("job", "t");
        cp.last_updated = Utc::now() + chrono::Duration::seconds(10);
        let before = cp.last_updated;
        cp.touch();
        assert!(cp.last_updated > before);
    }

    #[test]
    fn status_serializes_lowercase() {
        let cp = Checkpoint::new("job", "t");
        let json = serde_json::to_string(&cp).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
    }

    #[test]
    fn url_safe_replaces_separators() {
        assert_eq!(url_safe("a1B2/c:d"), "a1b2-c-d");
    }
}
