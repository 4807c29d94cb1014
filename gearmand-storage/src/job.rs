//! The persisted unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix the broker puts on every handle it hands out.
pub const JOB_PREFIX: &str = "H:";

/// A job submitted to the broker.
///
/// `handle` is the storage key. Every other field is data that storage only
/// round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    /// Broker-assigned unique identifier.
    pub handle: String,
    /// Client-supplied correlation identifier.
    pub id: String,
    /// Higher values are served first.
    pub priority: i32,
    /// Submission time; `None` when the broker did not record one.
    pub create_at: Option<DateTime<Utc>>,
    /// Function the job invokes.
    pub func_name: String,
    /// Opaque payload. `Some(vec![])` and `None` are different values.
    pub data: Option<Vec<u8>>,
}

impl Job {
    /// Create a job with the given handle and function name.
    #[must_use]
    pub fn new(handle: impl Into<String>, func_name: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            id: String::new(),
            priority: 0,
            create_at: None,
            func_name: func_name.into(),
            data: None,
        }
    }

    /// A job carrying only its handle, enough for [`done_job`](crate::JobStorage::done_job).
    #[must_use]
    pub fn handle_only(handle: impl Into<String>) -> Self {
        Self::new(handle, String::new())
    }

    /// Set the client correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the submission time.
    #[must_use]
    pub const fn with_create_at(mut self, create_at: DateTime<Utc>) -> Self {
        self.create_at = Some(create_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_sets_fields() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let job = Job::new("H:handle0", "reverse")
            .with_id("id0")
            .with_priority(3)
            .with_data("data0")
            .with_create_at(at);

        assert_eq!(job.handle, "H:handle0");
        assert_eq!(job.id, "id0");
        assert_eq!(job.priority, 3);
        assert_eq!(job.func_name, "reverse");
        assert_eq!(job.data.as_deref(), Some(b"data0".as_slice()));
        assert_eq!(job.create_at, Some(at));
        assert!(job.handle.starts_with(JOB_PREFIX));
    }

    #[test]
    fn test_empty_payload_differs_from_absent() {
        let empty = Job::new("H:a", "f").with_data(Vec::new());
        let absent = Job::new("H:a", "f");
        assert_ne!(empty, absent);
        assert_eq!(empty.data, Some(Vec::new()));
        assert_eq!(absent.data, None);
    }

    #[test]
    fn test_handle_only() {
        let job = Job::handle_only("worker-7");
        assert_eq!(job.handle, "worker-7");
        assert!(job.func_name.is_empty());
    }
}
