//! Single-flight load registry.
//!
//! Keeps one shared channel per key for as long as a load is in flight.
//! Every caller that asks for a key while its load is running joins the same
//! channel and receives the same shared handle; the loader itself is invoked
//! at most once. The key is unregistered as soon as the load completes, on
//! success and on failure alike, so failures are never cached.
//!
//! The registry knows nothing about recency or sizes; resident values are
//! owned by the cache's primary index.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::{CacheError, CacheResult};

type LoadResult<V> = CacheResult<Arc<V>>;

// The inner result is wrapped in a oneshot receiver because `Shared` needs a
// cloneable output, and the receiver gives us one cheaply.
type LoadChannel<V> = Shared<oneshot::Receiver<LoadResult<V>>>;

type InflightMap<K, V> = Arc<Mutex<HashMap<K, LoadChannel<V>>>>;

/// Removes the key from the in-flight map when dropped, no matter how the
/// load task ends.
struct Unregister<K: Eq + Hash, V> {
    inflight: InflightMap<K, V>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for Unregister<K, V> {
    fn drop(&mut self) {
        self.inflight.lock().remove(&self.key);
    }
}

/// The single-flight registry of in-flight loads.
pub(crate) struct LoadingValues<K, V> {
    inflight: InflightMap<K, V>,
}

impl<K, V> LoadingValues<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of loads currently in flight.
    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Whether any load is currently in flight.
    pub fn is_empty(&self) -> bool {
        self.inflight.lock().is_empty()
    }

    /// Sheds excess bucket capacity left behind by past load bursts.
    pub fn rehash(&self) {
        let mut inflight = self.inflight.lock();
        let len = inflight.len();
        if inflight.capacity() > 32 && inflight.capacity() / 4 > len {
            inflight.shrink_to(len * 2);
        }
    }
}

impl<K, V> LoadingValues<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Joins the in-flight load for `key`, or spawns `load` as a new one.
    ///
    /// Returns whether an existing load was joined, and a future resolving
    /// to the shared handle produced by whichever load won. This method is
    /// deliberately not async: the load is spawned eagerly, before anyone
    /// polls the returned future.
    pub fn get_or_load<F>(&self, key: &K, load: F) -> (bool, impl Future<Output = LoadResult<V>>)
    where
        F: FnOnce() -> BoxFuture<'static, CacheResult<V>>,
    {
        let (joined, channel) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(channel) => (true, channel.clone()),
                None => {
                    let computation = load();
                    let (sender, receiver) = oneshot::channel();
                    let unregister = Unregister {
                        inflight: Arc::clone(&self.inflight),
                        key: key.clone(),
                    };
                    // The task is spawned while the map is still locked, so
                    // its unregistration cannot run before the insert below.
                    tokio::spawn(async move {
                        let result = computation.await.map(Arc::new);
                        // Unregister before publishing the result: late
                        // callers either join a channel that will still
                        // deliver, or start a fresh load.
                        drop(unregister);
                        sender.send(result).ok();
                    });
                    let channel = receiver.shared();
                    inflight.insert(key.clone(), channel.clone());
                    (false, channel)
                }
            }
        };

        let result = async move {
            match channel.await {
                Ok(result) => result,
                Err(_canceled) => Err(CacheError::Load(
                    "the load task was dropped before completing".into(),
                )),
            }
        };
        (joined, result)
    }
}
