use thiserror::Error;

/// An error produced by the cache or by a user-supplied loader.
///
/// The error is intentionally cloneable: a single load is shared by every
/// caller that joined it, so its failure has to be handed to all of them.
/// Loader failures are therefore carried as messages rather than as the
/// original error value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A freshly loaded value is larger than the whole cache and was not
    /// installed.
    #[error("cache entry of size {size} exceeds the maximum cache size {max_size}")]
    EntryTooBig {
        /// Size of the rejected value, as reported by the size function.
        size: usize,
        /// The configured size budget.
        max_size: usize,
    },
    /// The key was not resident. Returned by [`at`](crate::LoadingCache::at).
    #[error("entry not found")]
    EntryNotFound,
    /// The cache was constructed with an invalid combination of knobs, or an
    /// operation requires a knob that was not configured.
    #[error("invalid cache configuration: {0}")]
    Configuration(String),
    /// The user-supplied loader failed. The message is the loader error's
    /// display output.
    #[error("load failed: {0}")]
    Load(String),
}

impl CacheError {
    /// Wraps a loader failure, preserving its display output.
    pub fn load(err: impl std::fmt::Display) -> Self {
        Self::Load(err.to_string())
    }
}

/// Result type returned throughout this crate.
pub type CacheResult<T> = Result<T, CacheError>;
