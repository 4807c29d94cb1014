//! Behavioral checks shared by every backend's test suite.
//!
//! Each check works under its own handle prefix and retires what it adds, so
//! checks can run one after another against the same store, and against a
//! store that holds unrelated jobs.

use anyhow::{bail, ensure, Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::job::{Job, JOB_PREFIX};
use crate::storage::JobStorage;

/// A whole-second timestamp, so it survives `TIMESTAMP` columns unchanged.
fn fixed_time(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// The reference job set, with handles under `prefix`.
///
/// Covers a handle equal to the bare prefix, jobs with and without a
/// submission time, and payloads that are present, empty and absent.
#[must_use]
pub fn sample_jobs(prefix: &str) -> Vec<Job> {
    vec![
        Job::new(format!("{prefix}handle0_"), "funcName0_")
            .with_id("id0_")
            .with_data("data0_")
            .with_create_at(fixed_time(1_700_000_000))
            .with_priority(0),
        Job::new(prefix, "funcName1_")
            .with_id("id1_")
            .with_data("data1_")
            .with_create_at(fixed_time(1_700_000_001))
            .with_priority(1),
        Job::new(format!("{prefix}handle2_"), "funcName2_")
            .with_id("id2_")
            .with_data("data2_")
            .with_priority(2),
        Job::new(format!("{prefix}handle3_"), "funcName3_")
            .with_id("id3_")
            .with_create_at(fixed_time(1_700_000_003))
            .with_priority(3),
        Job::new(format!("{prefix}handle4_"), "funcName4_")
            .with_id("id4_")
            .with_data("")
            .with_create_at(fixed_time(1_700_000_004))
            .with_priority(4),
        Job::new(format!("{prefix}handle5_"), "funcName5_")
            .with_id("id5_")
            .with_data("don't store")
            .with_priority(5),
    ]
}

/// Live jobs whose handle starts with `prefix`.
async fn live(storage: &dyn JobStorage, prefix: &str) -> Result<Vec<Job>> {
    let jobs = storage.get_jobs().await.context("get_jobs failed")?;
    Ok(jobs
        .into_iter()
        .filter(|j| j.handle.starts_with(prefix))
        .collect())
}

async fn retire_all(storage: &dyn JobStorage, jobs: &[Job]) -> Result<()> {
    for job in jobs {
        storage
            .done_job(job)
            .await
            .with_context(|| format!("done_job({}) failed", job.handle))?;
    }
    Ok(())
}

/// `init` can be called repeatedly without error or data loss.
///
/// # Errors
///
/// Returns a description of the first violated expectation.
pub async fn init_is_idempotent(storage: &dyn JobStorage) -> Result<()> {
    let prefix = "H:init:";
    storage.init().await.context("first init failed")?;
    let job = Job::new(format!("{prefix}survivor"), "f").with_data("kept");
    storage.add_job(&job).await.context("add_job failed")?;

    storage.init().await.context("second init failed")?;
    storage.init().await.context("third init failed")?;

    let jobs = live(storage, prefix).await?;
    ensure!(jobs == [job.clone()], "re-init changed stored jobs: {jobs:?}");
    retire_all(storage, &[job]).await
}

/// Every added job appears exactly once, with all fields intact, until retired.
///
/// # Errors
///
/// Returns a description of the first violated expectation.
pub async fn add_visibility(storage: &dyn JobStorage) -> Result<()> {
    let prefix = "H:visibility:";
    let jobs = sample_jobs(prefix);

    for (added, job) in jobs.iter().enumerate() {
        storage
            .add_job(job)
            .await
            .with_context(|| format!("add_job({}) failed", job.handle))?;

        let stored = live(storage, prefix).await?;
        ensure!(
            stored.len() == added + 1,
            "expected {} live jobs, got {}",
            added + 1,
            stored.len()
        );
        for expected in &jobs[..=added] {
            let matches: Vec<_> = stored.iter().filter(|j| j.handle == expected.handle).collect();
            ensure!(
                matches == [expected],
                "job {} stored as {matches:?}",
                expected.handle
            );
        }
    }

    retire_all(storage, &jobs).await?;
    let remaining = live(storage, prefix).await?;
    ensure!(remaining.is_empty(), "retired jobs still live: {remaining:?}");
    Ok(())
}

/// A retired job never comes back, and retiring it again is not-found.
///
/// # Errors
///
/// Returns a description of the first violated expectation.
pub async fn retire_removal(storage: &dyn JobStorage) -> Result<()> {
    let prefix = "H:retire:";
    let job = Job::new(format!("{prefix}once"), "f").with_priority(7);

    storage.add_job(&job).await.context("add_job failed")?;
    storage.done_job(&job).await.context("first done_job failed")?;

    for _ in 0..2 {
        let remaining = live(storage, prefix).await?;
        ensure!(remaining.is_empty(), "retired job reappeared: {remaining:?}");
    }

    match storage.done_job(&job).await {
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => bail!("second done_job failed with {e}, expected not-found"),
        Ok(()) => bail!("second done_job succeeded"),
    }
}

/// Retiring a handle that was never added is not-found.
///
/// # Errors
///
/// Returns a description of the first violated expectation.
pub async fn unknown_handle_rejected(storage: &dyn JobStorage) -> Result<()> {
    let job = Job::handle_only(format!("{JOB_PREFIX}unknown:never-added"));
    match storage.done_job(&job).await {
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => bail!("done_job on unknown handle failed with {e}, expected not-found"),
        Ok(()) => bail!("done_job on unknown handle succeeded"),
    }
}

/// Empty and absent payloads stay distinct, and a missing timestamp is accepted.
///
/// # Errors
///
/// Returns a description of the first violated expectation.
pub async fn payload_fidelity(storage: &dyn JobStorage) -> Result<()> {
    let prefix = "H:payload:";
    let empty = Job::new(format!("{prefix}empty"), "f").with_data("");
    let absent = Job::new(format!("{prefix}absent"), "f");
    let bytes = Job::new(format!("{prefix}bytes"), "f").with_data("line one\nline two\t\u{e9}");

    for job in [&empty, &absent, &bytes] {
        storage
            .add_job(job)
            .await
            .with_context(|| format!("add_job({}) failed", job.handle))?;
    }

    let stored: HashMap<String, Job> = live(storage, prefix)
        .await?
        .into_iter()
        .map(|j| (j.handle.clone(), j))
        .collect();

    for expected in [&empty, &absent, &bytes] {
        let Some(actual) = stored.get(&expected.handle) else {
            bail!("job {} missing", expected.handle);
        };
        ensure!(
            actual.data == expected.data,
            "job {} payload {:?}, expected {:?}",
            expected.handle,
            actual.data,
            expected.data
        );
        ensure!(
            actual.create_at.is_none(),
            "job {} gained a timestamp {:?}",
            expected.handle,
            actual.create_at
        );
    }

    retire_all(storage, &[empty, absent, bytes]).await
}

/// How precisely a backend keeps `create_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePrecision {
    /// Returned unchanged, down to the nanosecond.
    Exact,
    /// Truncated to whole seconds.
    Seconds,
}

/// A sub-second `create_at` comes back exactly, or truncated to whole seconds,
/// as `precision` says.
///
/// # Errors
///
/// Returns a description of the first violated expectation.
pub async fn create_at_precision(storage: &dyn JobStorage, precision: TimePrecision) -> Result<()> {
    let prefix = "H:precision:";
    let at = DateTime::from_timestamp(1_700_000_000, 500_000_123).unwrap_or_default();
    let job = Job::new(format!("{prefix}job"), "f").with_create_at(at);
    storage.add_job(&job).await.context("add_job failed")?;

    let expected = match precision {
        TimePrecision::Exact => at,
        TimePrecision::Seconds => at.trunc_subsecs(0),
    };
    let stored = live(storage, prefix).await?;
    ensure!(
        stored.iter().map(|j| j.create_at).eq([Some(expected)]),
        "create_at {at} stored as {:?}, expected {expected}",
        stored.iter().map(|j| j.create_at).collect::<Vec<_>>()
    );
    retire_all(storage, &[job]).await
}

/// Jobs come back highest priority first.
///
/// # Errors
///
/// Returns a description of the first violated expectation.
pub async fn priority_ordering(storage: &dyn JobStorage) -> Result<()> {
    let prefix = "H:priority:";
    let jobs: Vec<Job> = (0..5)
        .map(|p| Job::new(format!("{prefix}{p}"), "f").with_priority(p))
        .collect();

    for job in &jobs {
        storage.add_job(job).await.context("add_job failed")?;
    }

    let priorities: Vec<i32> = live(storage, prefix)
        .await?
        .iter()
        .map(|j| j.priority)
        .collect();
    ensure!(
        priorities == [4, 3, 2, 1, 0],
        "jobs returned in priority order {priorities:?}"
    );

    retire_all(storage, &jobs).await
}

/// A second add with a live handle is rejected and leaves the first job untouched.
///
/// # Errors
///
/// Returns a description of the first violated expectation.
pub async fn duplicate_handle_rejected(storage: &dyn JobStorage) -> Result<()> {
    let prefix = "H:duplicate:";
    let original = Job::new(format!("{prefix}job"), "first")
        .with_id("a")
        .with_data("original");
    let clash = Job::new(format!("{prefix}job"), "second")
        .with_id("b")
        .with_priority(9);

    storage.add_job(&original).await.context("add_job failed")?;
    match storage.add_job(&clash).await {
        Err(e) if e.is_duplicate() => {}
        Err(e) => bail!("duplicate add failed with {e}, expected duplicate"),
        Ok(()) => bail!("duplicate add succeeded"),
    }

    let stored = live(storage, prefix).await?;
    ensure!(stored == [original.clone()], "duplicate add changed storage: {stored:?}");
    retire_all(storage, &[original]).await
}

/// Add, list, retire and re-retire a single job.
///
/// # Errors
///
/// Returns a description of the first violated expectation.
pub async fn single_job_scenario(storage: &dyn JobStorage) -> Result<()> {
    let job = Job::new("H:handle0", "")
        .with_id("id0")
        .with_data("data0")
        .with_priority(0);

    storage.add_job(&job).await.context("add_job failed")?;

    let stored = live(storage, &job.handle).await?;
    let matching: Vec<_> = stored.iter().filter(|j| j.handle == job.handle).collect();
    ensure!(matching == [&job], "expected exactly the added job, got {matching:?}");

    storage
        .done_job(&Job::handle_only("H:handle0"))
        .await
        .context("done_job failed")?;

    let stored = live(storage, &job.handle).await?;
    ensure!(
        stored.iter().all(|j| j.handle != job.handle),
        "retired job still listed"
    );

    match storage.done_job(&Job::handle_only("H:handle0")).await {
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => bail!("repeated done_job failed with {e}, expected not-found"),
        Ok(()) => bail!("repeated done_job succeeded"),
    }
}

#[derive(Debug, Default)]
struct Tally {
    succeeded: Vec<String>,
    rejected: usize,
    failures: Vec<String>,
}

/// `workers` tasks add the same job set at once, then `workers` tasks retire it.
///
/// Exactly one add and one retire per handle may succeed; every other attempt
/// must be rejected as duplicate or not-found, and nothing may remain.
///
/// # Errors
///
/// Returns a description of the first violated expectation.
pub async fn concurrent_add_and_done(storage: Arc<dyn JobStorage>, workers: usize) -> Result<()> {
    let prefix = "H:concurrent:";
    let jobs = Arc::new(sample_jobs(prefix));

    let added = run_workers(&storage, &jobs, workers, Phase::Add).await?;
    check_exactly_once(&jobs, &added, "add_job")?;

    let stored = live(storage.as_ref(), prefix).await?;
    ensure!(
        stored.len() == jobs.len(),
        "expected {} live jobs after concurrent adds, got {}",
        jobs.len(),
        stored.len()
    );
    for job in jobs.iter() {
        ensure!(stored.contains(job), "job {} missing or altered", job.handle);
    }

    let retired = run_workers(&storage, &jobs, workers, Phase::Done).await?;
    check_exactly_once(&jobs, &retired, "done_job")?;

    let remaining = live(storage.as_ref(), prefix).await?;
    ensure!(remaining.is_empty(), "jobs left after concurrent retire: {remaining:?}");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Add,
    Done,
}

async fn run_workers(
    storage: &Arc<dyn JobStorage>,
    jobs: &Arc<Vec<Job>>,
    workers: usize,
    phase: Phase,
) -> Result<Vec<Tally>> {
    let tasks: Vec<_> = (0..workers)
        .map(|_| {
            let storage = Arc::clone(storage);
            let jobs = Arc::clone(jobs);
            tokio::spawn(async move {
                let mut tally = Tally::default();
                for job in jobs.iter() {
                    let result = match phase {
                        Phase::Add => storage.add_job(job).await,
                        Phase::Done => storage.done_job(job).await,
                    };
                    match (phase, result) {
                        (_, Ok(())) => tally.succeeded.push(job.handle.clone()),
                        (Phase::Add, Err(e)) if e.is_duplicate() => tally.rejected += 1,
                        (Phase::Done, Err(e)) if e.is_not_found() => tally.rejected += 1,
                        (_, Err(e)) => tally.failures.push(format!("{}: {e}", job.handle)),
                    }
                }
                tally
            })
        })
        .collect();

    let mut tallies = Vec::with_capacity(workers);
    for task in tasks {
        tallies.push(task.await.context("worker task panicked")?);
    }
    Ok(tallies)
}

fn check_exactly_once(jobs: &[Job], tallies: &[Tally], op: &str) -> Result<()> {
    let failures: Vec<_> = tallies.iter().flat_map(|t| t.failures.iter()).collect();
    ensure!(failures.is_empty(), "{op} failed unexpectedly: {failures:?}");

    let mut successes: HashMap<&str, usize> = HashMap::new();
    for handle in tallies.iter().flat_map(|t| t.succeeded.iter()) {
        *successes.entry(handle.as_str()).or_default() += 1;
    }
    for job in jobs {
        let count = successes.get(job.handle.as_str()).copied().unwrap_or(0);
        ensure!(count == 1, "{op}({}) succeeded {count} times", job.handle);
    }

    let attempts = jobs.len() * tallies.len();
    let rejected: usize = tallies.iter().map(|t| t.rejected).sum();
    ensure!(
        rejected == attempts - jobs.len(),
        "{op}: {rejected} rejections out of {attempts} attempts"
    );
    Ok(())
}

/// Run every check in sequence, expecting `create_at` to be kept at `precision`.
///
/// # Errors
///
/// Returns the first failing check's description.
pub async fn run_all(
    storage: Arc<dyn JobStorage>,
    precision: TimePrecision,
    workers: usize,
) -> Result<()> {
    let s = storage.as_ref();
    init_is_idempotent(s).await.context("init_is_idempotent")?;
    add_visibility(s).await.context("add_visibility")?;
    retire_removal(s).await.context("retire_removal")?;
    unknown_handle_rejected(s).await.context("unknown_handle_rejected")?;
    payload_fidelity(s).await.context("payload_fidelity")?;
    create_at_precision(s, precision)
        .await
        .context("create_at_precision")?;
    priority_ordering(s).await.context("priority_ordering")?;
    duplicate_handle_rejected(s)
        .await
        .context("duplicate_handle_rejected")?;
    single_job_scenario(s).await.context("single_job_scenario")?;
    concurrent_add_and_done(storage, workers)
        .await
        .context("concurrent_add_and_done")
}
