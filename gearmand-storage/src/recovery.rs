//! Startup recovery of pending jobs.

use std::collections::BTreeMap;
use tracing::{error, info};

use crate::error::Result;
use crate::job::Job;
use crate::storage::JobStorage;

/// Initialize `storage` and load every job that was pending when the broker
/// last stopped, highest priority first.
///
/// The broker rebuilds its in-memory queues from the result.
///
/// # Errors
///
/// Returns the `init` error unchanged when the backend is unreachable or its
/// schema is missing; the broker should treat that as fatal. A failing
/// `get_jobs` is returned as a read error.
pub async fn recover(storage: &dyn JobStorage) -> Result<Vec<Job>> {
    let backend = storage.name();

    storage.init().await.map_err(|e| {
        error!(backend, error = %e, "Storage initialization failed");
        e
    })?;

    let jobs = storage.get_jobs().await?;

    let mut per_function: BTreeMap<&str, usize> = BTreeMap::new();
    for job in &jobs {
        *per_function.entry(job.func_name.as_str()).or_default() += 1;
    }
    info!(
        backend,
        pending = jobs.len(),
        functions = ?per_function,
        "Recovered pending jobs"
    );

    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryStorage;
    use crate::config::DatabaseConfig;
    use crate::backends::SqlStorage;
    use crate::error::ErrorClass;

    #[tokio::test]
    async fn test_recover_returns_pending_jobs_in_priority_order() {
        let storage = MemoryStorage::new();
        storage
            .add_job(&Job::new("H:low", "resize").with_priority(0))
            .await
            .unwrap();
        storage
            .add_job(&Job::new("H:high", "resize").with_priority(2))
            .await
            .unwrap();

        let jobs = recover(&storage).await.unwrap();
        let handles: Vec<_> = jobs.iter().map(|j| j.handle.as_str()).collect();
        assert_eq!(handles, ["H:high", "H:low"]);
    }

    #[tokio::test]
    async fn test_recover_surfaces_init_failure() {
        let storage = SqlStorage::new(DatabaseConfig::new("ftp://nowhere/jobs"));
        let err = recover(&storage).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Initialization);
    }
}
