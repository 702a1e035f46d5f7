//! Background timer behavior: expiry, refresh and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loading_cache::{CacheError, LoadingCache};
use tokio::time::{self, Instant};

use crate::utils::{config, setup};

#[tokio::test(start_paused = true)]
async fn unread_entries_expire_and_load_again() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = {
        let calls = calls.clone();
        LoadingCache::with_loader(
            config(100, Duration::from_millis(200), Duration::from_millis(100)),
            move |key: &'static str| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(key.to_string()) }
            },
        )
        .unwrap()
    };

    cache.get(&"x").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // one background reload happens at 200ms, then the idle entry is
    // swept at 300ms
    time::sleep(Duration::from_millis(350)).await;
    assert_eq!(cache.entries_count(), 0);
    assert_eq!(cache.stats().expirations, 1);

    let before = calls.load(Ordering::SeqCst);
    cache.get(&"x").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), before + 1);
    cache.stop().await;
}

#[tokio::test(start_paused = true)]
async fn background_refresh_replaces_the_value_without_blocking_reads() {
    setup();

    let epoch = Instant::now();
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = {
        let calls = calls.clone();
        LoadingCache::with_loader(
            config(10, Duration::from_secs(2), Duration::from_millis(500)),
            move |_key: &'static str| {
                calls.fetch_add(1, Ordering::SeqCst);
                let loaded_at = epoch.elapsed().as_millis() as u64;
                async move {
                    time::sleep(Duration::from_millis(100)).await;
                    Ok(loaded_at)
                }
            },
        )
        .unwrap()
    };

    // initial load completes at 100ms and carries the 0ms timestamp
    assert_eq!(cache.get(&"k").await.unwrap(), 0);

    // the first tick eligible to reload runs at 1000ms
    time::sleep(Duration::from_millis(1100)).await;

    let before = Instant::now();
    let value = cache.get(&"k").await.unwrap();
    assert_eq!(before.elapsed(), Duration::ZERO, "the read must not block");
    assert_eq!(value, 1000);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().reloads, 1);
    cache.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_reloads_keep_the_stale_value_until_it_ages_out() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = {
        let calls = calls.clone();
        LoadingCache::with_loader(
            config(10, Duration::from_secs(1), Duration::from_millis(300)),
            move |_key: &'static str| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Ok("v1")
                    } else {
                        Err(CacheError::load("backend down"))
                    }
                }
            },
        )
        .unwrap()
    };

    cache.get(&"k").await.unwrap();

    // reloads fail at 600ms and 900ms; reads keep seeing the stale value
    time::sleep(Duration::from_millis(450)).await;
    assert_eq!(cache.get(&"k").await.unwrap(), "v1");

    // at 1200ms the value's load age exceeds the expiry and it is dropped
    // even though it was recently read
    time::sleep(Duration::from_millis(800)).await;
    assert_eq!(cache.entries_count(), 0);
    assert_eq!(cache.stats().reload_failures, 2);

    // with the entry gone the failure now reaches the caller
    let err = cache.get(&"k").await.unwrap_err();
    assert_eq!(err, CacheError::Load("backend down".into()));
    cache.stop().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_longer_than_expiry_never_reloads() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = {
        let calls = calls.clone();
        LoadingCache::with_loader(
            config(10, Duration::from_millis(100), Duration::from_secs(1)),
            move |key: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(key) }
            },
        )
        .unwrap()
    };

    cache.get(&1).await.unwrap();
    time::sleep(Duration::from_millis(250)).await;

    // the entry expired before ever becoming eligible for a reload
    assert_eq!(cache.entries_count(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().reloads, 0);
    cache.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_drains_an_inflight_reload() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = {
        let calls = calls.clone();
        LoadingCache::with_loader(
            config(10, Duration::from_secs(10), Duration::from_millis(100)),
            move |_key: &'static str| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call > 0 {
                        // background reloads are slow
                        time::sleep(Duration::from_millis(500)).await;
                    }
                    Ok(call as u32)
                }
            },
        )
        .unwrap()
    };

    cache.get(&"k").await.unwrap();

    // the tick at 200ms starts a reload that will finish at 700ms
    time::sleep(Duration::from_millis(250)).await;

    let before = Instant::now();
    cache.stop().await;
    assert_eq!(before.elapsed(), Duration::from_millis(450));

    // the reload was drained, not aborted
    assert_eq!(*cache.find(&"k").unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_twice_is_harmless() {
    setup();

    let cache = LoadingCache::with_loader(
        config(10, Duration::from_secs(1), Duration::from_millis(500)),
        |key: u32| async move { Ok(key) },
    )
    .unwrap();

    cache.stop().await;
    cache.stop().await;
}
