//! Tracing subscriber setup for binaries and tests.

use std::sync::Once;

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Default filter applied when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "medallion=info";

/// Filter applied for tests when `RUST_LOG` is not set.
const TEST_FILTER: &str = "medallion=debug";

static TEST_TRACING: Once = Once::new();

/// Initializes the global tracing subscriber for a binary.
///
/// Honors `RUST_LOG` when set, defaulting to info-level output for the
/// pipeline crates. Panics if a global subscriber is already installed, which
/// indicates double initialization.
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(service = service_name, "tracing initialized");
}

/// Initializes tracing for tests.
///
/// Safe to call from every test; initialization happens once per process and
/// later calls are no-ops. Output goes through the test writer so it is
/// captured per test.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(TEST_FILTER));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}
