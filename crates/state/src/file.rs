use crate::{
    error::StateError,
    models::{url_safe, Checkpoint},
    StateStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, warn};

/// One `.state` file per checkpoint and one `.lock` file per lease under a
/// root directory.
///
/// Checkpoint writes go to a `.tmp` sibling and are renamed into place, so
/// the store is crash-safe up to the last completed rename. Lease
/// acquisition is try-create-exclusive with expiry honored on read.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub async fn open(root: PathBuf) -> Result<Self, StateError> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(FileStateStore { root })
    }

    fn state_path(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{}.state", url_safe(job_id)))
    }

    fn lock_path(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{}.lock", url_safe(job_id)))
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StateError> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_lock_expiry(path: &Path) -> Result<Option<DateTime<Utc>>, StateError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents).ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn try_create_lock(path: &Path, expires_at: DateTime<Utc>) -> Result<bool, StateError> {
        let contents = serde_json::to_vec(&expires_at)?;
        let result = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await;
        match result {
            Ok(file) => {
                let mut file = file;
                use tokio::io::AsyncWriteExt;
                file.write_all(&contents).await?;
                file.sync_all().await?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, job_id: &str) -> Result<Option<Checkpoint>, StateError> {
        match tokio::fs::read_to_string(self.state_path(job_id)).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        if self.get(&checkpoint.job_id).await?.is_some() {
            return Err(StateError::AlreadyExists(checkpoint.job_id.clone()));
        }
        let contents = serde_json::to_vec_pretty(checkpoint)?;
        Self::write_atomic(&self.state_path(&checkpoint.job_id), &contents).await
    }

    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let contents = serde_json::to_vec_pretty(checkpoint)?;
        Self::write_atomic(&self.state_path(&checkpoint.job_id), &contents).await
    }

    async fn delete(&self, job_id: &str) -> Result<(), StateError> {
        for path in [self.state_path(job_id), self.lock_path(job_id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, StateError> {
        let mut checkpoints = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("state") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str(&contents) {
                    Ok(cp) => checkpoints.push(cp),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable state file")
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable state file")
                }
            }
        }
        Ok(checkpoints)
    }

    async fn acquire_lease(&self, job_id: &str, ttl: Duration) -> Result<bool, StateError> {
        let path = self.lock_path(job_id);
        let expires_at = Utc::now() + ttl;

        if Self::try_create_lock(&path, expires_at).await? {
            return Ok(true);
        }

        match Self::read_lock_expiry(&path).await? {
            Some(current) if current > Utc::now() => Ok(false),
            _ => {
                // Stale or unreadable lock: reclaim it.
                debug!(job_id, "reclaiming expired lease");
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Self::try_create_lock(&path, expires_at).await
            }
        }
    }

    async fn renew_lease(&self, job_id: &str, ttl: Duration) -> Result<(), StateError> {
        let expires_at = Utc::now() + ttl;
        let contents = serde_json::to_vec(&expires_at)?;
        Self::write_atomic(&self.lock_path(job_id), &contents).await
    }

    async fn release_lease(&self, job_id: &str) -> Result<(), StateError> {
        match tokio::fs::remove_file(self.lock_path(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use model::{core::value::Value, pagination::key::KeyTuple};
    use tempfile::tempdir;

    async fn store(dir: &tempfile::TempDir) -> FileStateStore {
        FileStateStore::open(dir.path().to_path_buf()).await.unwrap()
    }

    #[tokio::test]
    async fn checkpoint_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;

        let mut cp = Checkpoint::new("job-1", "public.users");
        cp.status = JobStatus::Running;
        cp.last_key = Some(KeyTuple::new(vec![Value::Int(2)]));
        cp.processed_rows = 2;
        store.create(&cp).await.unwrap();

        let loaded = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(loaded, cp);
    }

    #[tokio::test]
    async fn create_rejects_existing_state_file() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;
        let cp = Checkpoint::new("job-1", "t");
        store.create(&cp).await.unwrap();
        assert!(matches!(
            store.create(&cp).await,
            Err(StateError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn state_files_use_url_safe_names() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;
        let cp = Checkpoint::new("Job/1:extra", "t");
        store.create(&cp).await.unwrap();
        assert!(dir.path().join("job-1-extra.state").exists());
    }

    #[tokio::test]
    async fn lock_file_blocks_second_acquirer() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;
        let ttl = Duration::from_secs(60);

        assert!(store.acquire_lease("job-1", ttl).await.unwrap());
        assert!(dir.path().join("job-1.lock").exists());
        assert!(!store.acquire_lease("job-1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;

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
    async fn release_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;
        store.release_lease("job-1").await.unwrap();
    }

    #[tokio::test]
    async fn list_skips_foreign_files() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;
        store.create(&Checkpoint::new("job-1", "t")).await.unwrap();
        tokio::fs::write(dir.path().join("junk.state"), b"not json")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("other.txt"), b"ignored")
            .await
            .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].job_id, "job-1");
    }
}
