//! The backend-agnostic storage contract.

use async_trait::async_trait;
use std::sync::Arc;

use crate::backends::{MemoryStorage, SqlStorage};
use crate::config::{BackendConfig, StorageConfig};
use crate::error::Result;
use crate::job::Job;

/// Persistence contract every backend implements.
///
/// All methods may be called concurrently from many tasks. Each job's add and
/// retire is atomic with respect to itself; `get_jobs` is a best-effort
/// snapshot, not a transactional read. No method retries internally.
#[async_trait]
pub trait JobStorage: Send + Sync {
    /// Backend name, used in logs.
    fn name(&self) -> &'static str;

    /// Open connections and verify the backend is usable.
    ///
    /// Safe to call more than once; later calls reuse the connection and only
    /// re-verify it.
    ///
    /// # Errors
    ///
    /// Returns an initialization error if the backend is unreachable or its
    /// schema is missing.
    async fn init(&self) -> Result<()>;

    /// Persist a job. Once this returns `Ok`, the job is visible to every
    /// later `get_jobs` call.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Duplicate`](crate::StorageError::Duplicate) if
    /// a live job already has this handle, or a write error if the backend
    /// could not store it.
    async fn add_job(&self, job: &Job) -> Result<()>;

    /// All live jobs, highest priority first.
    ///
    /// # Errors
    ///
    /// Returns a read error if the backend could not be queried. Stored jobs
    /// are unaffected.
    async fn get_jobs(&self) -> Result<Vec<Job>>;

    /// Retire the job identified by `job.handle`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`](crate::StorageError::NotFound) if no
    /// live job has this handle, including when it was already retired. On
    /// any other error the job stays live.
    async fn done_job(&self, job: &Job) -> Result<()>;
}

/// Build the backend described by `config`. No I/O happens until `init`.
#[must_use]
pub fn build(config: &StorageConfig) -> Arc<dyn JobStorage> {
    match &config.backend {
        BackendConfig::Memory => Arc::new(MemoryStorage::new()),
        #[cfg(feature = "redis")]
        BackendConfig::Redis(redis) => Arc::new(crate::backends::RedisStorage::new(redis.clone())),
        #[cfg(not(feature = "redis"))]
        BackendConfig::Redis(_) => Arc::new(Unavailable("redis")),
        BackendConfig::Sql(db) => Arc::new(SqlStorage::new(db.clone())),
    }
}

/// Sort jobs by priority, highest first, keeping the current order of equal
/// priorities.
pub fn sort_by_priority(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| b.priority.cmp(&a.priority));
}

/// Placeholder for a backend compiled out by feature flags.
#[cfg(not(feature = "redis"))]
struct Unavailable(&'static str);

#[cfg(not(feature = "redis"))]
#[async_trait]
impl JobStorage for Unavailable {
    fn name(&self) -> &'static str {
        self.0
    }

    async fn init(&self) -> Result<()> {
        Err(crate::StorageError::Init {
            backend: self.0,
            message: format!("crate built without the `{}` feature", self.0),
        })
    }

    async fn add_job(&self, _job: &Job) -> Result<()> {
        Err(crate::StorageError::NotInitialized)
    }

    async fn get_jobs(&self) -> Result<Vec<Job>> {
        Err(crate::StorageError::NotInitialized)
    }

    async fn done_job(&self, _job: &Job) -> Result<()> {
        Err(crate::StorageError::NotInitialized)
    }
}
