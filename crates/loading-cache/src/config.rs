use std::time::Duration;

use serde::Deserialize;

use crate::error::{CacheError, CacheResult};

/// Tuning knobs for a [`LoadingCache`](crate::LoadingCache).
///
/// All durations deserialize in humantime format (`500ms`, `10s`, `2h`).
///
/// Setting `expiry` to zero disables caching entirely: every read calls the
/// loader in the foreground and nothing is stored. Any other configuration
/// must have a non-zero `max_size`, and caches built with a loader must also
/// have a non-zero `refresh`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on the sum of entry sizes.
    pub max_size: usize,

    /// How long an entry may go without being read (or, for refreshing
    /// caches, without being freshly loaded) before it is evicted.
    #[serde(with = "humantime_serde")]
    pub expiry: Duration,

    /// How old a loaded value may get before the background timer reloads
    /// it. Only meaningful for caches built with a loader.
    ///
    /// To keep a hot value permanently resident and reads non-blocking,
    /// choose `expiry` of at least `refresh` plus the expected load latency.
    #[serde(with = "humantime_serde")]
    pub refresh: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            expiry: Duration::from_secs(600),
            refresh: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Returns `false` if this configuration disables caching altogether.
    pub fn caching_enabled(&self) -> bool {
        !self.expiry.is_zero()
    }

    pub(crate) fn validate(&self, reload_enabled: bool) -> CacheResult<()> {
        if !self.caching_enabled() {
            return Ok(());
        }
        if self.max_size == 0 {
            return Err(CacheError::Configuration(
                "caching is enabled but max_size is zero".into(),
            ));
        }
        if reload_enabled && self.refresh.is_zero() {
            return Err(CacheError::Configuration(
                "caching is enabled but the refresh period is zero".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn timer_period(&self, reload_enabled: bool) -> Duration {
        if reload_enabled {
            self.expiry.min(self.refresh)
        } else {
            (self.expiry / 2).max(Duration::from_millis(1))
        }
    }
}
