//! In-process read-through cache for aggregate views.
//!
//! - [`ViewCache`] holds one entry per view key, fills misses through a
//!   [`ViewFetcher`], prefetches near-expiry hits in the background and falls
//!   back to the last value when a refill fails.
//! - [`CacheWarmer`] populates the cache in tiers at startup and after bulk
//!   invalidation.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! max_items = 500
//! prefetch_threshold = 0.1
//! priority_prefetch_threshold = 0.2
//! fetch_timeout_ms = 10000
//! # ... see config.rs for all options
//! ```

mod config;
mod entry;
mod fetch;
mod inflight;
mod lock;
mod prefetch;
mod registry;
mod stats;
mod store;
mod tasks;
mod warmer;

pub use config::CacheConfig;
pub use entry::{CacheEntry, EntrySnapshot, ViewData};
pub use fetch::{CacheError, FetchError, SharedFetcher, ViewFetcher, fetcher};
pub use inflight::InFlightFetches;
pub use prefetch::{PrefetchGuard, PrefetchQueue, adaptive_ttl, should_prefetch};
pub use registry::{FetchRegistry, Registration};
pub use stats::CacheStats;
pub use store::ViewCache;
pub use tasks::BackgroundTasks;
pub use warmer::{
    CacheWarmer, FamilyError, FamilyFactory, WarmError, WarmPlan, WarmReport, WarmTier,
    WarmerConfig, family_key, valid_family_id,
};
