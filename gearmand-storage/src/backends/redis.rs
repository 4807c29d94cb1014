//! Redis storage backend.
//!
//! Each live job is a hash at `{prefix}job:{handle}`. The sorted set
//! `{prefix}jobs` indexes live handles by insertion sequence so `get_jobs`
//! never scans the keyspace. Add and retire each run as a single Lua script,
//! which makes them atomic per job.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::config::RedisConfig;
use crate::error::{Operation, Result, StorageError};
use crate::job::Job;
use crate::storage::{sort_by_priority, JobStorage};

/// KEYS: index, record, sequence. ARGV: handle, id, priority, func_name,
/// create_at ('' for none), has_data ('1'/'0'), data.
const ADD_SCRIPT: &str = r"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
    return 0
end
local seq = redis.call('INCR', KEYS[3])
redis.call('DEL', KEYS[2])
redis.call('HSET', KEYS[2], 'handle', ARGV[1], 'id', ARGV[2], 'priority', ARGV[3], 'func_name', ARGV[4])
if ARGV[5] ~= '' then
    redis.call('HSET', KEYS[2], 'create_at', ARGV[5])
end
if ARGV[6] == '1' then
    redis.call('HSET', KEYS[2], 'data', ARGV[7])
end
redis.call('ZADD', KEYS[1], seq, ARGV[1])
return 1
";

/// KEYS: index, record. ARGV: handle.
const DONE_SCRIPT: &str = r"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('DEL', KEYS[2])
return 1
";

/// Job storage on Redis.
///
/// Survives broker restarts for as long as the Redis server keeps its data.
/// A single multiplexed connection is shared by all callers.
pub struct RedisStorage {
    config: RedisConfig,
    conn: OnceCell<ConnectionManager>,
    add_script: Script,
    done_script: Script,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("address", &self.config.address)
            .field("key_prefix", &self.config.key_prefix)
            .field("connected", &self.conn.initialized())
            .finish_non_exhaustive()
    }
}

impl RedisStorage {
    /// Create a backend for the given Redis server. Connects on [`init`](JobStorage::init).
    #[must_use]
    pub fn new(config: RedisConfig) -> Self {
        Self {
            config,
            conn: OnceCell::new(),
            add_script: Script::new(ADD_SCRIPT),
            done_script: Script::new(DONE_SCRIPT),
        }
    }

    fn index_key(&self) -> String {
        format!("{}jobs", self.config.key_prefix)
    }

    fn sequence_key(&self) -> String {
        format!("{}seq", self.config.key_prefix)
    }

    fn record_key(&self, handle: &str) -> String {
        format!("{}job:{handle}", self.config.key_prefix)
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.conn.get().cloned().ok_or(StorageError::NotInitialized)
    }

    async fn connect(&self) -> Result<ConnectionManager> {
        let client = Client::open(self.config.url().as_str())
            .map_err(|e| StorageError::redis(Operation::Init, e))?;

        let timeout = Duration::from_secs(self.config.connect_timeout_seconds);
        let conn = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| StorageError::Init {
                backend: "redis",
                message: format!(
                    "timed out after {}s connecting to {}",
                    self.config.connect_timeout_seconds, self.config.address
                ),
            })?
            .map_err(|e| {
                error!(error = %e, address = %self.config.address, "Redis connection failed");
                StorageError::redis(Operation::Init, e)
            })?;

        info!(address = %self.config.address, "Connected to Redis");
        Ok(conn)
    }
}

/// Decode a job hash. `None` means the record no longer exists.
fn decode_record(handle: &str, mut fields: HashMap<String, Vec<u8>>) -> Result<Option<Job>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let corrupt = |reason: String| StorageError::Corrupt {
        handle: handle.to_string(),
        reason,
    };
    let mut text = |name: &str| -> Result<Option<String>> {
        fields
            .remove(name)
            .map(|raw| String::from_utf8(raw).map_err(|_| corrupt(format!("{name} is not UTF-8"))))
            .transpose()
    };

    let id = text("id")?.unwrap_or_default();
    let func_name = text("func_name")?.unwrap_or_default();
    let priority = text("priority")?
        .ok_or_else(|| corrupt("missing priority".to_string()))?
        .parse::<i32>()
        .map_err(|e| corrupt(format!("bad priority: {e}")))?;
    let create_at = text("create_at")?
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad create_at {s:?}: {e}")))
        })
        .transpose()?;
    let data = fields.remove("data");

    Ok(Some(Job {
        handle: handle.to_string(),
        id,
        priority,
        create_at,
        func_name,
        data,
    }))
}

fn encode_create_at(create_at: Option<&DateTime<Utc>>) -> String {
    create_at.map_or_else(String::new, |at| {
        at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    })
}

#[async_trait]
impl JobStorage for RedisStorage {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.conn.get_or_try_init(|| self.connect()).await?.clone();

        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, "PING failed");
                StorageError::redis(Operation::Init, e)
            })?;

        debug!(prefix = %self.config.key_prefix, "Redis storage ready");
        Ok(())
    }

    async fn add_job(&self, job: &Job) -> Result<()> {
        let mut conn = self.connection()?;
        debug!(handle = %job.handle, priority = job.priority, "ADD");

        let added: i64 = self
            .add_script
            .key(self.index_key())
            .key(self.record_key(&job.handle))
            .key(self.sequence_key())
            .arg(&job.handle)
            .arg(&job.id)
            .arg(job.priority)
            .arg(&job.func_name)
            .arg(encode_create_at(job.create_at.as_ref()))
            .arg(if job.data.is_some() { "1" } else { "0" })
            .arg(job.data.as_deref().unwrap_or_default())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, handle = %job.handle, "ADD failed");
                StorageError::redis(Operation::AddJob, e)
            })?;

        if added == 0 {
            return Err(StorageError::Duplicate {
                handle: job.handle.clone(),
            });
        }
        Ok(())
    }

    async fn get_jobs(&self) -> Result<Vec<Job>> {
        let mut conn = self.connection()?;
        let read_failed = |e: redis::RedisError| {
            error!(error = %e, "GET_JOBS failed");
            StorageError::redis(Operation::GetJobs, e)
        };

        let handles: Vec<String> = redis::cmd("ZRANGE")
            .arg(self.index_key())
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(read_failed)?;
        debug!(count = handles.len(), "ZRANGE");

        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for handle in &handles {
            pipe.cmd("HGETALL").arg(self.record_key(handle));
        }
        let records: Vec<HashMap<String, Vec<u8>>> =
            pipe.query_async(&mut conn).await.map_err(read_failed)?;

        let mut jobs = Vec::with_capacity(handles.len());
        for (handle, fields) in handles.iter().zip(records) {
            match decode_record(handle, fields)? {
                Some(job) => jobs.push(job),
                None => warn!(handle = %handle, "Job record vanished during read, skipping"),
            }
        }

        sort_by_priority(&mut jobs);
        Ok(jobs)
    }

    async fn done_job(&self, job: &Job) -> Result<()> {
        let mut conn = self.connection()?;
        debug!(handle = %job.handle, "DONE");

        let removed: i64 = self
            .done_script
            .key(self.index_key())
            .key(self.record_key(&job.handle))
            .arg(&job.handle)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, handle = %job.handle, "DONE failed");
                StorageError::redis(Operation::DoneJob, e)
            })?;

        if removed == 0 {
            return Err(StorageError::NotFound {
                handle: job.handle.clone(),
            });
        }
        Ok(())
    }
}
