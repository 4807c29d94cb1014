//! Job storage for a Gearman-style job broker.
//!
//! Provides the [`JobStorage`] contract and its backends:
//! - [`RedisStorage`]: low-latency store on Redis hashes plus a sorted-set index
//! - [`SqlStorage`]: durable store on a single `job` table (MySQL, PostgreSQL, SQLite)
//! - [`MemoryStorage`]: volatile in-process store
//!
//! The broker calls [`recover`] once at startup and then uses `add_job`,
//! `get_jobs` and `done_job` concurrently for the life of the process.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backends;
pub mod config;
pub mod error;
pub mod job;
pub mod recovery;
pub mod storage;

/// Shared behavioral checks every [`JobStorage`] implementation must pass.
///
/// Backend test suites call these functions with their own storage instance.
#[doc(hidden)]
pub mod conformance;

pub use backends::MemoryStorage;
#[cfg(feature = "redis")]
pub use backends::RedisStorage;
pub use backends::{Dialect, SqlStorage};
pub use config::{BackendConfig, DatabaseConfig, RedisConfig, StorageConfig};
pub use error::{ErrorClass, Operation, Result, StorageError};
pub use job::{Job, JOB_PREFIX};
pub use recovery::recover;
pub use storage::JobStorage;
