//! Read-path behavior: single-flight loads, LRU eviction and sizing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loading_cache::{CacheError, LoadingCache};

use crate::utils::{config, setup};

#[tokio::test(start_paused = true)]
async fn concurrent_gets_share_a_single_load() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = {
        let calls = calls.clone();
        LoadingCache::with_loader(
            config(10, Duration::from_secs(1), Duration::from_millis(500)),
            move |key: &'static str| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(key.to_string())
                }
            },
        )
        .unwrap()
    };

    let results = futures::join!(
        cache.get(&"a"),
        cache.get(&"a"),
        cache.get(&"a"),
        cache.get(&"a"),
        cache.get(&"a"),
    );

    for result in [results.0, results.1, results.2, results.3, results.4] {
        assert_eq!(result.unwrap(), "a");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().coalesced_loads, 4);
    cache.stop().await;
}

#[tokio::test(start_paused = true)]
async fn per_call_loaders_join_the_inflight_load_too() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = {
        let calls = calls.clone();
        LoadingCache::with_loader(
            config(10, Duration::from_secs(1), Duration::from_millis(500)),
            move |key: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(key)
                }
            },
        )
        .unwrap()
    };

    let (a, b) = futures::join!(
        cache.get(&1),
        cache.get_with(&1, |_| async { Err(CacheError::load("must not run")) }),
    );
    assert_eq!(a.unwrap(), 1);
    assert_eq!(b.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    cache.stop().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_gets_return_the_same_handle() {
    setup();

    let cache = LoadingCache::with_loader(
        config(10, Duration::from_secs(10), Duration::from_secs(5)),
        |key: u32| async move { Ok(key * 10) },
    )
    .unwrap();

    let first = cache.get_ptr(&7).await.unwrap();
    let second = cache.get_ptr(&7).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.stats().hits, 1);
    cache.stop().await;
}

#[tokio::test(start_paused = true)]
async fn lru_eviction_drops_the_least_recently_used_key() {
    setup();

    let cache = LoadingCache::with_loader(
        config(3, Duration::from_secs(10), Duration::from_secs(5)),
        |key: u32| async move { Ok(key * 10) },
    )
    .unwrap();

    for key in [1, 2, 3, 1, 4] {
        cache.get(&key).await.unwrap();
    }

    // 2 was the least recently used entry when 4 was installed
    assert_eq!(cache.entries_count(), 3);
    assert!(cache.find(&1).is_some());
    assert!(cache.find(&2).is_none());
    assert!(cache.find(&3).is_some());
    assert!(cache.find(&4).is_some());
    assert_eq!(cache.stats().evictions, 1);
    cache.debug_validate_invariants();
    cache.stop().await;
}

#[tokio::test(start_paused = true)]
async fn oversize_values_are_rejected_without_disturbing_the_cache() {
    setup();

    let cache = LoadingCache::builder()
        .max_size(4)
        .expiry(Duration::from_secs(10))
        .refresh(Duration::from_secs(5))
        .weigher(|value: &String| value.len())
        .build_with_loader(|key: &'static str| async move { Ok(key.to_string()) })
        .unwrap();

    assert_eq!(cache.get(&"a").await.unwrap(), "a");

    let err = cache.get(&"hello").await.unwrap_err();
    assert_eq!(
        err,
        CacheError::EntryTooBig {
            size: 5,
            max_size: 4
        }
    );

    assert_eq!(cache.entries_count(), 1);
    assert_eq!(cache.size(), 1);
    assert!(cache.find(&"a").is_some());
    cache.debug_validate_invariants();
    cache.stop().await;
}

#[tokio::test(start_paused = true)]
async fn foreground_failures_are_propagated_and_not_cached() {
    setup();

    let cache: LoadingCache<&'static str, u32> =
        LoadingCache::new(config(10, Duration::from_secs(1), Duration::ZERO)).unwrap();

    let err = cache
        .get_with(&"k", |_| async { Err(CacheError::load("backend down")) })
        .await
        .unwrap_err();
    assert_eq!(err, CacheError::Load("backend down".into()));
    assert_eq!(cache.entries_count(), 0);

    // the failure was not cached, the next load runs and succeeds
    let value = cache.get_with(&"k", |_| async { Ok(9) }).await.unwrap();
    assert_eq!(value, 9);
    assert_eq!(cache.entries_count(), 1);
    cache.stop().await;
}
