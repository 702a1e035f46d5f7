use std::time::Duration;

use loading_cache::CacheConfig;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Sets up the test environment: captures this crate's trace output with
/// the test runner.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("loading_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn config(max_size: usize, expiry: Duration, refresh: Duration) -> CacheConfig {
    CacheConfig {
        max_size,
        expiry,
        refresh,
    }
}
