// crates/test-utils/src/lib.rs

//! Shared helpers for suitelink tests: tracing setup, bounded waits and
//! the scripted [`fake_backend::FakeBackend`].

pub mod builders;
pub mod fake_backend;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use suitelink::task::{TaskRef, TaskStatus};
use tracing_subscriber::{EnvFilter, fmt};

pub use fake_backend::{BackendRecord, FakeBackend};

/// Upper bound for any single awaited step in a test.
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Install a test-captured subscriber once per process. `RUST_LOG`
/// overrides the default `info` filter.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test after [`TEST_DEADLINE`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_DEADLINE, f)
        .await
        .expect("test step did not finish within the deadline")
}

/// Wait until `task` leaves `Queued`/`Dispatched` and return its final status.
pub async fn finished(task: &TaskRef) -> TaskStatus {
    with_timeout(task.wait()).await
}
