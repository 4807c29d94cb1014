//! Storage error types.

use std::fmt;
use thiserror::Error;

/// A specialized Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// The storage operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `JobStorage::init`
    Init,
    /// `JobStorage::add_job`
    AddJob,
    /// `JobStorage::get_jobs`
    GetJobs,
    /// `JobStorage::done_job`
    DoneJob,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::AddJob => write!(f, "add_job"),
            Self::GetJobs => write!(f, "get_jobs"),
            Self::DoneJob => write!(f, "done_job"),
        }
    }
}

/// Broad category of a [`StorageError`], used by the broker to pick a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Backend unreachable, misconfigured or schema missing. Fatal at startup.
    Initialization,
    /// `add_job` failed; the job may or may not have been stored if the cause was connectivity.
    Write,
    /// `done_job` on an unknown or already retired handle.
    NotFound,
    /// `get_jobs` failed; stored state is unaffected.
    Read,
    /// `done_job` failed for a reason other than not-found; the job is still live.
    Backend,
}

/// Errors returned by [`JobStorage`](crate::JobStorage) implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An operation was called before `init` established a connection.
    #[error("storage backend is not initialized")]
    NotInitialized,

    /// The backend could not be prepared for use.
    #[error("failed to initialize {backend} storage: {message}")]
    Init {
        /// Backend name.
        backend: &'static str,
        /// What went wrong.
        message: String,
    },

    /// Configuration could not be loaded or parsed.
    #[error("invalid storage configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A live job with the same handle already exists.
    #[error("job {handle} already exists")]
    Duplicate {
        /// Offending handle.
        handle: String,
    },

    /// No live job with this handle.
    #[error("job {handle} not found")]
    NotFound {
        /// Requested handle.
        handle: String,
    },

    /// A field does not fit the backend's column bounds.
    #[error("{field} is {len} long, limit is {max}")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// The payload cannot be stored in a text column.
    #[error("payload of job {handle} cannot be stored as text")]
    InvalidPayload {
        /// Handle of the rejected job.
        handle: String,
    },

    /// A text field holds characters the backend cannot store.
    #[error("{field} of job {handle} contains characters the backend cannot store")]
    UnsupportedText {
        /// Field name.
        field: &'static str,
        /// Handle of the rejected job.
        handle: String,
    },

    /// A stored record could not be decoded.
    #[error("corrupt record for job {handle}: {reason}")]
    Corrupt {
        /// Handle of the record.
        handle: String,
        /// Decoding failure.
        reason: String,
    },

    /// Redis command failure.
    #[cfg(feature = "redis")]
    #[error("redis {op} failed: {source}")]
    Redis {
        /// Failing operation.
        op: Operation,
        /// Underlying error.
        #[source]
        source: redis::RedisError,
    },

    /// Database failure.
    #[error("database {op} failed: {source}")]
    Database {
        /// Failing operation.
        op: Operation,
        /// Underlying error.
        #[source]
        source: sqlx::Error,
    },
}

impl From<figment::Error> for StorageError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl StorageError {
    /// Wrap a Redis error raised by `op`.
    #[cfg(feature = "redis")]
    #[must_use]
    pub const fn redis(op: Operation, source: redis::RedisError) -> Self {
        Self::Redis { op, source }
    }

    /// Wrap a database error raised by `op`.
    #[must_use]
    pub const fn database(op: Operation, source: sqlx::Error) -> Self {
        Self::Database { op, source }
    }

    /// Category of this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NotInitialized | Self::Init { .. } | Self::Config(_) => ErrorClass::Initialization,
            Self::Duplicate { .. }
            | Self::FieldTooLong { .. }
            | Self::InvalidPayload { .. }
            | Self::UnsupportedText { .. } => ErrorClass::Write,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Corrupt { .. } => ErrorClass::Read,
            #[cfg(feature = "redis")]
            Self::Redis { op, .. } => Self::class_of(*op),
            Self::Database { op, .. } => Self::class_of(*op),
        }
    }

    const fn class_of(op: Operation) -> ErrorClass {
        match op {
            Operation::Init => ErrorClass::Initialization,
            Operation::AddJob => ErrorClass::Write,
            Operation::GetJobs => ErrorClass::Read,
            Operation::DoneJob => ErrorClass::Backend,
        }
    }

    /// Whether this is a not-found error from `done_job`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether `add_job` rejected a duplicate handle.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Whether the failure came from losing the connection to the backend.
    ///
    /// Only the caller knows whether retrying is safe; storage never retries.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "redis")]
            Self::Redis { source, .. } => {
                source.is_io_error()
                    || source.is_connection_dropped()
                    || source.is_connection_refusal()
                    || source.is_timeout()
            }
            Self::Database { source, .. } => matches!(
                source,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}
