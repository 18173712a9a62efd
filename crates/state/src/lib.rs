pub mod error;
pub mod file;
pub mod kubernetes;
pub mod memory;
pub mod models;

use crate::{error::StateError, models::Checkpoint};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Checkpoint persistence plus lease-based single-writer enforcement.
///
/// All backends share this contract; the engine relies on lease
/// exclusivity, not on cross-worker read-after-write.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Latest persisted checkpoint, or `None` when the job is unknown.
    async fn get(&self, job_id: &str) -> Result<Option<Checkpoint>, StateError>;

    /// Fails with [`StateError::AlreadyExists`] when the job already has a
    /// checkpoint.
    async fn create(&self, checkpoint: &Checkpoint) -> Result<(), StateError>;

    /// Atomic replace. Only the lease holder may call this; the engine
    /// enforces that.
    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), StateError>;

    /// Removes checkpoint and lease; idempotent.
    async fn delete(&self, job_id: &str) -> Result<(), StateError>;

    async fn list(&self) -> Result<Vec<Checkpoint>, StateError>;

    /// Atomic compare-and-set: true iff no live lease existed.
    async fn acquire_lease(&self, job_id: &str, ttl: Duration) -> Result<bool, StateError>;

    /// Extends the current lease. Holder-only, engine-enforced.
    async fn renew_lease(&self, job_id: &str, ttl: Duration) -> Result<(), StateError>;

    /// No-op when the lease is not held.
    async fn release_lease(&self, job_id: &str) -> Result<(), StateError>;
}

/// Which state backend a run uses.
#[derive(Debug, Clone)]
pub enum StateBackend {
    Memory,
    File { root: std::path::PathBuf },
    Kubernetes { namespace: String },
}

pub async fn open(backend: &StateBackend) -> Result<Arc<dyn StateStore>, StateError> {
    match backend {
        StateBackend::Memory => Ok(Arc::new(memory::MemoryStateStore::new())),
        StateBackend::File { root } => {
            Ok(Arc::new(file::FileStateStore::open(root.clone()).await?))
        }
        StateBackend::Kubernetes { namespace } => Ok(Arc::new(
            kubernetes::KubernetesStateStore::in_cluster(namespace.clone()).await?,
        )),
    }
}
