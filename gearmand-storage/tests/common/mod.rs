//! Helpers shared by the backend test suites.

use tracing_subscriber::EnvFilter;

/// Concurrent workers used by the contention check.
pub const WORKERS: usize = 8;

/// Install a test-friendly tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "gearmand_storage=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
