use crate::{
    error::StateError,
    models::Checkpoint,
    StateStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

#[derive(Default)]
struct Inner {
    checkpoints: HashMap<String, Checkpoint>,
    leases: HashMap<String, DateTime<Utc>>,
}

/// In-process store for tests and single-instance runs. No durability.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned mutex means a writer panicked mid-update; the maps are
        // still structurally sound, so keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, job_id: &str) -> Result<Option<Checkpoint>, StateError> {
        Ok(self.lock().checkpoints.get(job_id).cloned())
    }

    async fn create(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let mut inner = self.lock();
        if inner.checkpoints.contains_key(&checkpoint.job_id) {
            return Err(StateError::AlreadyExists(checkpoint.job_id.clone()));
        }
        inner
            .checkpoints
            .insert(checkpoint.job_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        self.lock()
            .checkpoints
            .insert(checkpoint.job_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<(), StateError> {
        let mut inner = self.lock();
        inner.checkpoints.remove(job_id);
        inner.leases.remove(job_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, StateError> {
        Ok(self.lock().checkpoints.values().cloned().collect())
    }

    async fn acquire_lease(&self, job_id: &str, ttl: Duration) -> Result<bool, StateError> {
        let mut inner = self.lock();
        let now = Utc::now();
        if let Some(expires_at) = inner.leases.get(job_id) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        inner
            .leases
            .insert(job_id.to_string(), now + ttl);
        Ok(true)
    }

    async fn renew_lease(&self, job_id: &str, ttl: Duration) -> Result<(), StateError> {
        self.lock()
            .leases
            .insert(job_id.to_string(), Utc::now() + ttl);
        Ok(())
    }

    async fn release_lease(&self, job_id: &str) -> Result<(), StateError> {
        self.lock().leases.remove(job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let store = MemoryStateStore::new();
        let cp = Checkpoint::new("job-1", "users");
        store.create(&cp).await.unwrap();
        assert!(matches!(
            store.create(&cp).await,
            Err(StateError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn update_replaces_and_get_reads_back() {
        let store = MemoryStateStore::new();
        let mut cp = Checkpoint::new("job-1", "users");
        store.create(&cp).await.unwrap();

        cp.status = JobStatus::Running;
        cp.processed_rows = 42;
        store.update(&cp).await.unwrap();

        let loaded = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.processed_rows, 42);
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released() {
        let store = MemoryStateStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.acquire_lease("job-1", ttl).await.unwrap());
        assert!(!store.acquire_lease("job-1", ttl).await.unwrap());

        store.release_lease("job-1").await.unwrap();
        assert!(store.acquire_lease("job-1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_can_be_reacquired() {
        let store = MemoryStateStore::new();
        assert!(store
            .acquire_lease("job-1", Duration::from_millis(0))
            .await
            .unwrap());
        assert!(store
            .acquire_lease("job-1", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_removes_checkpoint_and_lease() {
        let store = MemoryStateStore::new();
        let cp = Checkpoint::new("job-1", "users");
        store.create(&cp).await.unwrap();
        store
            .acquire_lease("job-1", Duration::from_secs(60))
            .await
            .unwrap();

        store.delete("job-1").await.unwrap();
        assert!(store.get("job-1").await.unwrap().is_none());
        assert!(store
            .acquire_lease("job-1", Duration::from_secs(60))
            .await
            .unwrap());
    }
}
