//! In-process storage backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::job::Job;
use crate::storage::{sort_by_priority, JobStorage};

#[derive(Debug, Default)]
struct State {
    /// Next insertion sequence number.
    next_seq: u64,
    /// Live jobs keyed by insertion sequence.
    jobs: BTreeMap<u64, Job>,
    /// Handle to insertion sequence.
    index: HashMap<String, u64>,
}

/// Volatile job storage held in process memory.
///
/// Nothing survives a restart. Useful for tests and single-process brokers
/// that accept losing pending work.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Whether no jobs are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStorage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn add_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock();
        if state.index.contains_key(&job.handle) {
            return Err(StorageError::Duplicate {
                handle: job.handle.clone(),
            });
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.index.insert(job.handle.clone(), seq);
        state.jobs.insert(seq, job.clone());
        drop(state);

        debug!(handle = %job.handle, priority = job.priority, "Job added");
        Ok(())
    }

    async fn get_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.state.lock().jobs.values().cloned().collect();
        sort_by_priority(&mut jobs);
        Ok(jobs)
    }

    async fn done_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock();
        let Some(seq) = state.index.remove(&job.handle) else {
            return Err(StorageError::NotFound {
                handle: job.handle.clone(),
            });
        };
        state.jobs.remove(&seq);
        drop(state);

        debug!(handle = %job.handle, "Job retired");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_and_done() {
        let storage = MemoryStorage::new();
        let job = Job::new("H:1", "f");

        storage.add_job(&job).await.unwrap();
        assert_eq!(storage.len(), 1);

        storage.done_job(&job).await.unwrap();
        assert!(storage.is_empty());

        let err = storage.done_job(&job).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_readd_after_retire_goes_to_back_of_tier() {
        let storage = MemoryStorage::new();
        let a = Job::new("H:a", "f");
        let b = Job::new("H:b", "f");

        storage.add_job(&a).await.unwrap();
        storage.add_job(&b).await.unwrap();
        storage.done_job(&a).await.unwrap();
        storage.add_job(&a).await.unwrap();

        let handles: Vec<_> = storage
            .get_jobs()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.handle)
            .collect();
        assert_eq!(handles, ["H:b", "H:a"]);
    }

    #[tokio::test]
    async fn test_duplicate_does_not_overwrite() {
        let storage = MemoryStorage::new();
        storage
            .add_job(&Job::new("H:1", "first").with_priority(1))
            .await
            .unwrap();

        let err = storage
            .add_job(&Job::new("H:1", "second").with_priority(9))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());

        let jobs = storage.get_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].func_name, "first");
    }
}
