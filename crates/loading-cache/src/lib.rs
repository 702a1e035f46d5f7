//! An asynchronous loading cache with background refresh and size-bounded
//! LRU eviction.
//!
//! The cache produces values through a user-supplied asynchronous loader and
//! amortizes the cost of loading across concurrent requesters: however many
//! callers ask for the same key at the same time, the loader runs at most
//! once per key in flight, and every caller receives a handle to the same
//! produced value.
//!
//! ## Modes
//!
//! A cache built with a loader ([`LoadingCache::with_loader`] or
//! [`CacheBuilder::build_with_loader`]) is *refreshing*: a background timer
//! periodically reloads resident values once their load age exceeds the
//! `refresh` period, replacing them in place while reads keep being served
//! from the existing value. Reads of a frequently accessed key therefore
//! never block on the loader once the key is resident. Background reload
//! failures are never surfaced: the stale value stays and, if failures
//! persist, ages out through the expiry sweep.
//!
//! A cache built without a loader ([`LoadingCache::new`] or
//! [`CacheBuilder::build`]) is *read-through*: every
//! [`get_with`](LoadingCache::get_with) call supplies its own loader and the
//! timer only expires entries.
//!
//! ## Expiry and sizing
//!
//! Entries that were not read within the `expiry` period, as well as (for
//! refreshing caches) entries whose last successful load is older than
//! `expiry`, are evicted by the timer. To keep a hot value permanently
//! resident, configure `expiry` of at least `refresh` plus the expected load
//! latency; the value is then always refreshed before it can go stale.
//!
//! The cache is also bounded in size: the sum of entry sizes, as reported by
//! the configured size function (every entry weighs 1 by default), never
//! exceeds `max_size` after an operation completes. Exceeding the budget
//! evicts least recently used entries first. A single value larger than the
//! whole budget is not installed at all; the read fails with
//! [`CacheError::EntryTooBig`].
//!
//! Setting `expiry` to zero disables caching: every read calls the loader
//! in the foreground and nothing is stored.
//!
//! ## Runtime
//!
//! Constructing a cache spawns its timer task, and loads are spawned so
//! that they make progress even if the requesting future is dropped, so
//! caches have to be created and used inside a tokio runtime. Call
//! [`stop`](LoadingCache::stop) before tearing the cache down; it drains an
//! in-flight background refresh pass before returning.

#![warn(missing_docs)]

mod builder;
mod cache;
mod config;
mod error;
mod lru;
mod shared;
mod stats;

pub use builder::CacheBuilder;
pub use cache::{Loader, LoadingCache, Weigher};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use stats::CacheStats;
