//! The cache controller: public API, size accounting and the background
//! timer.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::lru::{Entry, EntryId, LruList};
use crate::shared::LoadingValues;
use crate::stats::{CacheStats, Counters};

/// The boxed loader held by refreshing caches.
pub type Loader<K, V> = Box<dyn Fn(K) -> BoxFuture<'static, CacheResult<V>> + Send + Sync>;

/// The boxed size function applied to freshly loaded values.
pub type Weigher<V> = Box<dyn Fn(&V) -> usize + Send + Sync>;

pub(crate) enum Mode<K, V> {
    /// Read-through: the loader is supplied per call and the timer only
    /// expires entries.
    Expiry,
    /// Refreshing: the configured loader is also used to reload resident
    /// entries in the background once their load age exceeds the refresh
    /// period.
    Refresh {
        refresh: Duration,
        loader: Loader<K, V>,
    },
}

/// The resident entries: primary index, LRU list and size accounting.
///
/// Everything in here is mutated from both the read path and the timer
/// path, always inside one critical section and never across an await.
struct CacheState<K, V> {
    index: HashMap<K, EntryId>,
    lru: LruList<K, V>,
    current_size: usize,
}

impl<K, V> CacheState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            lru: LruList::new(),
            current_size: 0,
        }
    }

    /// A reading lookup: records the read and moves the entry to MRU.
    fn hit(&mut self, key: &K, now: Instant) -> Option<Arc<V>> {
        let id = *self.index.get(key)?;
        let entry = self.lru.get_mut(id)?;
        entry.mark_read(now);
        let value = entry.handle();
        self.lru.move_to_front(id);
        Some(value)
    }

    /// A non-reading lookup: no timestamps, no LRU movement.
    fn peek(&self, key: &K) -> Option<Arc<V>> {
        let id = *self.index.get(key)?;
        Some(self.lru.get(id)?.handle())
    }

    fn install(&mut self, key: K, value: Arc<V>, size: usize, now: Instant) {
        let id = self.lru.push_front(Entry::new(key.clone(), value, size, now));
        self.index.insert(key, id);
        self.current_size += size;
    }

    /// Removes an entry from the index and the list in one step.
    fn remove_entry(&mut self, id: EntryId) -> Option<Entry<K, V>> {
        let entry = self.lru.remove(id)?;
        self.index.remove(entry.key());
        self.current_size -= entry.size();
        Some(entry)
    }

    fn remove_key(&mut self, key: &K) -> Option<Entry<K, V>> {
        let id = *self.index.get(key)?;
        self.remove_entry(id)
    }

    /// Sheds excess index capacity left behind after the population shrank.
    fn rehash(&mut self) {
        let len = self.index.len();
        if self.index.capacity() > 32 && self.index.capacity() / 4 > len {
            self.index.shrink_to(len * 2);
        }
    }
}

struct CacheInner<K, V> {
    config: CacheConfig,
    mode: Mode<K, V>,
    weigher: Weigher<V>,
    state: Mutex<CacheState<K, V>>,
    loading: LoadingValues<K, V>,
    counters: Counters,
}

/// An asynchronous loading cache with single-flight loads, size-bounded LRU
/// eviction, time-based expiry and optional background refresh.
///
/// See the [crate docs](crate) for the full semantics. Constructed via
/// [`LoadingCache::new`] (read-through), [`LoadingCache::with_loader`]
/// (refreshing) or [`LoadingCache::builder`]. Construction spawns the
/// background timer, so a cache has to be created inside a tokio runtime.
///
/// Once the cache is no longer needed, call [`stop`](LoadingCache::stop) to
/// drain in-flight background work; merely dropping the cache aborts the
/// timer without draining.
pub struct LoadingCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
    shutdown: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> fmt::Debug for LoadingCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingCache").finish_non_exhaustive()
    }
}

impl<K, V> LoadingCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a read-through cache: every [`get_with`](Self::get_with)
    /// carries its own loader and the background timer only expires
    /// entries.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        Self::build(config, Box::new(|_| 1), Mode::Expiry)
    }

    /// Creates a refreshing cache around the given loader. The loader
    /// serves foreground misses of [`get`](Self::get)/[`get_ptr`](Self::get_ptr)
    /// and background reloads of entries whose load age exceeds
    /// [`refresh`](CacheConfig::refresh).
    pub fn with_loader<F, Fut>(config: CacheConfig, load: F) -> CacheResult<Self>
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<V>> + Send + 'static,
    {
        let refresh = config.refresh;
        Self::build(
            config,
            Box::new(|_| 1),
            Mode::Refresh {
                refresh,
                loader: Box::new(move |key| load(key).boxed()),
            },
        )
    }

    /// Returns a [`CacheBuilder`](crate::CacheBuilder) for setting a size
    /// function on top of the plain constructors.
    pub fn builder() -> crate::CacheBuilder<K, V> {
        crate::CacheBuilder::new()
    }

    pub(crate) fn build(
        config: CacheConfig,
        weigher: Weigher<V>,
        mode: Mode<K, V>,
    ) -> CacheResult<Self> {
        let reload_enabled = matches!(mode, Mode::Refresh { .. });
        config.validate(reload_enabled)?;

        let inner = Arc::new(CacheInner {
            config,
            mode,
            weigher,
            state: Mutex::new(CacheState::new()),
            loading: LoadingValues::new(),
            counters: Counters::default(),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let timer = inner
            .config
            .caching_enabled()
            .then(|| spawn_timer(&inner, shutdown_rx));

        Ok(Self {
            inner,
            shutdown,
            timer: Mutex::new(timer),
        })
    }

    /// Fetches the value for `key` through the configured loader, cloning
    /// it out of the cache.
    ///
    /// On a resident hit this returns immediately and refreshes the entry's
    /// read time and LRU position. On a miss the loader runs (or an
    /// in-flight load for the same key is joined) and the result is
    /// installed. Loader failures are returned and nothing is stored; a
    /// value larger than the whole cache is rejected with
    /// [`CacheError::EntryTooBig`].
    ///
    /// Fails with [`CacheError::Configuration`] on caches built without a
    /// loader.
    pub async fn get(&self, key: &K) -> CacheResult<V>
    where
        V: Clone,
    {
        self.get_ptr(key).await.map(|value| (*value).clone())
    }

    /// Like [`get`](Self::get), but hands out a shared handle instead of a
    /// clone.
    pub async fn get_ptr(&self, key: &K) -> CacheResult<Arc<V>> {
        let Mode::Refresh { loader, .. } = &self.inner.mode else {
            return Err(CacheError::Configuration(
                "this cache was built without a loader".into(),
            ));
        };
        self.inner
            .get_or_install(key, || loader(key.clone()))
            .await
    }

    /// Fetches the value for `key`, producing it with `load` on a miss.
    ///
    /// Same semantics as [`get`](Self::get) with the loader supplied per
    /// call. If a load for this key is already in flight (no matter which
    /// call started it), `load` is not invoked and the in-flight result is
    /// shared.
    pub async fn get_with<F, Fut>(&self, key: &K, load: F) -> CacheResult<V>
    where
        V: Clone,
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = CacheResult<V>> + Send + 'static,
    {
        self.get_ptr_with(key, load).await.map(|value| (*value).clone())
    }

    /// Like [`get_with`](Self::get_with), but hands out a shared handle.
    pub async fn get_ptr_with<F, Fut>(&self, key: &K, load: F) -> CacheResult<Arc<V>>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = CacheResult<V>> + Send + 'static,
    {
        self.inner
            .get_or_install(key, || load(key.clone()).boxed())
            .await
    }

    /// Direct lookup without counting as a read: no timestamps are updated
    /// and the LRU order is left alone.
    pub fn find(&self, key: &K) -> Option<Arc<V>> {
        self.inner.state.lock().peek(key)
    }

    /// Like [`find`](Self::find), but failing with
    /// [`CacheError::EntryNotFound`] when the key is not resident.
    pub fn at(&self, key: &K) -> CacheResult<Arc<V>> {
        self.find(key).ok_or(CacheError::EntryNotFound)
    }

    /// Removes the entry for `key`. Returns the number of entries removed
    /// (zero or one).
    pub fn erase(&self, key: &K) -> usize {
        let mut state = self.inner.state.lock();
        match state.remove_key(key) {
            Some(entry) => {
                tracing::trace!(key = ?entry.key(), "erased the entry");
                Counters::bump(&self.inner.counters.removals);
                1
            }
            None => 0,
        }
    }

    /// Removes every entry whose key and value match `pred`, walking the
    /// list from MRU to LRU. The predicate sees the value without counting
    /// as a read. Returns the number of entries removed.
    pub fn remove_if(&self, mut pred: impl FnMut(&K, &V) -> bool) -> usize {
        let mut state = self.inner.state.lock();
        let mut removed = 0;
        for id in state.lru.ids() {
            let Some(entry) = state.lru.get(id) else {
                continue;
            };
            if pred(entry.key(), entry.peek()) {
                if let Some(entry) = state.remove_entry(id) {
                    tracing::trace!(key = ?entry.key(), "removed the entry matching the predicate");
                    Counters::bump(&self.inner.counters.removals);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Number of resident entries.
    pub fn entries_count(&self) -> usize {
        self.inner.state.lock().index.len()
    }

    /// Sum of resident entry sizes.
    pub fn size(&self) -> usize {
        self.inner.state.lock().current_size
    }

    /// The configured size budget.
    pub fn max_size(&self) -> usize {
        self.inner.config.max_size
    }

    /// A snapshot of the cache's activity counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        self.inner.counters.snapshot(
            self.inner.loading.len(),
            state.index.len(),
            state.current_size,
            self.inner.config.max_size,
        )
    }

    /// Shuts the background timer down, draining an in-flight refresh pass
    /// first: if the timer is currently reloading entries, `stop` resolves
    /// only once those reloads have finished.
    ///
    /// The cache must not be used after `stop` returns.
    pub async fn stop(&self) {
        tracing::trace!("stopping the cache timer");
        let _ = self.shutdown.send(true);
        let handle = self.timer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        // Foreground loads are the caller's to quiesce; they complete or
        // fail on their own.
        if !self.inner.loading.is_empty() {
            tracing::trace!(
                inflight = self.inner.loading.len(),
                "loads still in flight after stop"
            );
        }
    }

    /// Panics if the resident state is inconsistent: index and list must
    /// agree on membership and `current_size` must equal the sum of entry
    /// sizes.
    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        let state = self.inner.state.lock();
        state.lru.validate();
        assert_eq!(state.index.len(), state.lru.len(), "index/list membership differs");
        let mut total = 0;
        for (id, entry) in state.lru.iter() {
            assert_eq!(state.index.get(entry.key()), Some(&id), "index points elsewhere");
            total += entry.size();
        }
        assert_eq!(total, state.current_size, "size accounting is off");
    }
}

impl<K, V> Drop for LoadingCache<K, V> {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

impl<K, V> CacheInner<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn reload_enabled(&self) -> bool {
        matches!(self.mode, Mode::Refresh { .. })
    }

    async fn get_or_install<F>(&self, key: &K, load: F) -> CacheResult<Arc<V>>
    where
        F: FnOnce() -> BoxFuture<'static, CacheResult<V>>,
    {
        // A zero expiry disables caching: load in the foreground and store
        // nothing.
        if !self.config.caching_enabled() {
            Counters::bump(&self.counters.loads);
            return match load().await {
                Ok(value) => Ok(Arc::new(value)),
                Err(err) => {
                    Counters::bump(&self.counters.load_failures);
                    Err(err)
                }
            };
        }

        if let Some(value) = self.state.lock().hit(key, Instant::now()) {
            Counters::bump(&self.counters.hits);
            return Ok(value);
        }
        Counters::bump(&self.counters.misses);

        let (joined, load) = self.loading.get_or_load(key, load);
        Counters::bump(if joined {
            &self.counters.coalesced_loads
        } else {
            &self.counters.loads
        });

        let value = match load.await {
            Ok(value) => value,
            Err(err) => {
                Counters::bump(&self.counters.load_failures);
                return Err(err);
            }
        };

        // The await above was a suspension point; another caller that
        // joined the same load may have installed the entry already.
        self.install(key, value)
    }

    fn install(&self, key: &K, value: Arc<V>) -> CacheResult<Arc<V>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        if let Some(existing) = state.hit(key, now) {
            return Ok(existing);
        }

        let size = (self.weigher)(&value);
        if size > self.config.max_size {
            return Err(CacheError::EntryTooBig {
                size,
                max_size: self.config.max_size,
            });
        }

        tracing::trace!(key = ?key, size, "storing the value for the first time");
        state.install(key.clone(), Arc::clone(&value), size, now);
        if state.current_size > self.config.max_size {
            self.shrink(&mut state);
        }
        Ok(value)
    }

    /// One timer pass: expiry sweep, size shrink and rehash in a single
    /// critical section, then the refresh fan-out with no lock held.
    async fn tick(&self) {
        tracing::trace!("timer tick: start");
        let started = Instant::now();
        {
            let mut state = self.state.lock();
            self.drop_expired(&mut state, started);
            self.shrink(&mut state);
            self.rehash(&mut state);
        }

        if let Mode::Refresh { refresh, .. } = &self.mode {
            let refresh = *refresh;
            let stale: Vec<K> = {
                let state = self.state.lock();
                state
                    .lru
                    .iter()
                    .filter_map(|(_, entry)| {
                        tracing::trace!(key = ?entry.key(), "timer tick: checking the value age");
                        (entry.loaded_at() + refresh < started).then(|| entry.key().clone())
                    })
                    .collect()
            };
            future::join_all(stale.into_iter().map(|key| self.reload(key))).await;
        }
        tracing::trace!("timer tick: rearming");
    }

    /// Drops entries that were neither read nor (in refreshing caches)
    /// freshly loaded within the expiry period.
    fn drop_expired(&self, state: &mut CacheState<K, V>, now: Instant) {
        let check_staleness = self.reload_enabled();
        for id in state.lru.ids() {
            let Some(entry) = state.lru.get(id) else {
                continue;
            };
            let idle = now.saturating_duration_since(entry.last_read_at());
            let staleness = now.saturating_duration_since(entry.loaded_at());
            if idle > self.config.expiry || (check_staleness && staleness > self.config.expiry) {
                tracing::trace!(
                    key = ?entry.key(),
                    idle_ms = idle.as_millis() as u64,
                    staleness_ms = staleness.as_millis() as u64,
                    "dropping the expired entry"
                );
                state.remove_entry(id);
                Counters::bump(&self.counters.expirations);
            }
        }
    }

    /// Evicts from the LRU tail until the size budget holds again.
    fn shrink(&self, state: &mut CacheState<K, V>) {
        while state.current_size > self.config.max_size {
            let Some(id) = state.lru.back() else {
                break;
            };
            let Some(entry) = state.remove_entry(id) else {
                break;
            };
            let idle = Instant::now().saturating_duration_since(entry.last_read_at());
            tracing::trace!(
                key = ?entry.key(),
                idle_ms = idle.as_millis() as u64,
                "evicting the least recently used entry"
            );
            Counters::bump(&self.counters.evictions);
        }
    }

    fn rehash(&self, state: &mut CacheState<K, V>) {
        self.loading.rehash();
        let before = state.index.capacity();
        state.rehash();
        let after = state.index.capacity();
        if after < before {
            tracing::trace!(before, after, "rehash: shrank the index");
        }
    }

    /// Reloads one entry in the background.
    ///
    /// The key is captured by value: the entry may be evicted while the
    /// loader runs, in which case the result is dropped. A failed reload is
    /// logged and the stale value stays; if failures persist, the entry
    /// ages out through the expiry sweep.
    async fn reload(&self, key: K) {
        let Mode::Refresh { loader, .. } = &self.mode else {
            return;
        };
        tracing::trace!(key = ?key, "reloading the value");
        Counters::bump(&self.counters.reloads);

        let result = loader(key.clone()).await;

        let mut state = self.state.lock();
        let Some(&id) = state.index.get(&key) else {
            tracing::trace!(key = ?key, "the entry was dropped during the reload");
            return;
        };
        match result {
            Ok(value) => {
                let value = Arc::new(value);
                let size = (self.weigher)(&value);
                let old_size = match state.lru.get_mut(id) {
                    Some(entry) => entry.reassign(value, size, Instant::now()),
                    None => return,
                };
                state.current_size = state.current_size - old_size + size;
            }
            Err(err) => {
                Counters::bump(&self.counters.reload_failures);
                tracing::debug!(key = ?key, error = %err, "reload failed; keeping the stale value");
            }
        }
    }
}

/// Spawns the periodic timer task.
///
/// The task holds the cache weakly so an abandoned cache can be dropped;
/// it exits when the cache goes away or the shutdown signal fires. A tick
/// always runs to completion before the signal is observed, which is what
/// lets [`LoadingCache::stop`] drain an in-flight refresh pass.
fn spawn_timer<K, V>(
    inner: &Arc<CacheInner<K, V>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let period = inner.config.timer_period(inner.reload_enabled());
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut next = Instant::now() + period;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = time::sleep_until(next) => {}
            }
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let started = Instant::now();
            inner.tick().await;
            // Rearm relative to the moment the tick started so a long
            // sweep does not drift the schedule.
            next = started + period;
        }
    })
}
