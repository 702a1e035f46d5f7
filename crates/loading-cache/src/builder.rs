use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::time::Duration;

use futures::future::FutureExt;

use crate::cache::{Mode, Weigher};
use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::LoadingCache;

/// Builder for a [`LoadingCache`].
///
/// ```no_run
/// use std::time::Duration;
/// use loading_cache::{CacheResult, LoadingCache};
///
/// # async fn doc() -> CacheResult<()> {
/// let cache: LoadingCache<String, String> = LoadingCache::builder()
///     .max_size(64 * 1024)
///     .expiry(Duration::from_secs(60))
///     .refresh(Duration::from_secs(10))
///     .weigher(|value: &String| value.len())
///     .build_with_loader(|key: String| async move { Ok(key.to_uppercase()) })?;
///
/// let value = cache.get(&"hello".to_string()).await?;
/// # Ok(())
/// # }
/// ```
pub struct CacheBuilder<K, V> {
    config: CacheConfig,
    weigher: Weigher<V>,
    _key: PhantomData<fn(K)>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Starts from the default [`CacheConfig`] and an entry-count size
    /// function (every entry weighs 1).
    pub fn new() -> Self {
        Self::from_config(CacheConfig::default())
    }

    /// Starts from an existing configuration, typically deserialized.
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            weigher: Box::new(|_| 1),
            _key: PhantomData,
        }
    }

    /// Sets the upper bound on the sum of entry sizes.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    /// Sets the expiry period. Zero disables caching.
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.config.expiry = expiry;
        self
    }

    /// Sets the background refresh period. Only meaningful together with
    /// [`build_with_loader`](Self::build_with_loader).
    pub fn refresh(mut self, refresh: Duration) -> Self {
        self.config.refresh = refresh;
        self
    }

    /// Sets the size function applied to every loaded value.
    pub fn weigher(mut self, weigher: impl Fn(&V) -> usize + Send + Sync + 'static) -> Self {
        self.weigher = Box::new(weigher);
        self
    }

    /// Builds a read-through cache; loads are supplied per
    /// [`get_with`](LoadingCache::get_with) call.
    pub fn build(self) -> CacheResult<LoadingCache<K, V>> {
        LoadingCache::build(self.config, self.weigher, Mode::Expiry)
    }

    /// Builds a refreshing cache around the given loader.
    pub fn build_with_loader<F, Fut>(self, load: F) -> CacheResult<LoadingCache<K, V>>
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<V>> + Send + 'static,
    {
        let refresh = self.config.refresh;
        LoadingCache::build(
            self.config,
            self.weigher,
            Mode::Refresh {
                refresh,
                loader: Box::new(move |key| load(key).boxed()),
            },
        )
    }
}

impl<K, V> Default for CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
