//! Fetch registry.
//!
//! Maps a cache key to the fetch function, TTL and priority flag needed to
//! re-fetch it without the caller, which is what prefetch and warming rely on.
//! Registrations outlive entries: invalidation never touches them.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::fetch::SharedFetcher;
use super::lock;

const SOURCE: &str = "cache::registry";

/// How a key is re-fetched.
#[derive(Clone)]
pub struct Registration {
    pub key: String,
    pub fetcher: SharedFetcher,
    pub ttl: Duration,
    pub priority: bool,
    /// Registration order, preserved across overwrites.
    pub seq: u64,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Append/overwrite-only store of registrations plus the priority-key set
/// consulted by eviction and bulk invalidation.
pub struct FetchRegistry {
    registrations: RwLock<HashMap<String, Registration>>,
    priority: RwLock<HashSet<String>>,
    next_seq: AtomicU64,
}

impl FetchRegistry {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            priority: RwLock::new(HashSet::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Insert or replace the registration for `key`.
    ///
    /// Also adds `key` to (or removes it from) the priority set.
    pub fn register(&self, key: &str, fetcher: SharedFetcher, ttl: Duration, priority: bool) {
        {
            let mut registrations = lock::write(&self.registrations, SOURCE, "register");
            let seq = registrations
                .get(key)
                .map(|existing| existing.seq)
                .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed));
            registrations.insert(
                key.to_string(),
                Registration {
                    key: key.to_string(),
                    fetcher,
                    ttl,
                    priority,
                    seq,
                },
            );
        }

        let mut set = lock::write(&self.priority, SOURCE, "register.priority");
        if priority {
            set.insert(key.to_string());
        } else {
            set.remove(key);
        }
    }

    /// Register only if nothing is registered for `key` yet.
    ///
    /// Returns true when a registration was added.
    pub fn register_if_absent(&self, key: &str, fetcher: SharedFetcher, ttl: Duration) -> bool {
        let mut registrations = lock::write(&self.registrations, SOURCE, "register_if_absent");
        if registrations.contains_key(key) {
            return false;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        registrations.insert(
            key.to_string(),
            Registration {
                key: key.to_string(),
                fetcher,
                ttl,
                priority: false,
                seq,
            },
        );
        true
    }

    pub fn get(&self, key: &str) -> Option<Registration> {
        lock::read(&self.registrations, SOURCE, "get")
            .get(key)
            .cloned()
    }

    pub fn is_priority(&self, key: &str) -> bool {
        lock::read(&self.priority, SOURCE, "is_priority").contains(key)
    }

    /// Snapshot of the priority-key set.
    pub fn priority_keys(&self) -> HashSet<String> {
        lock::read(&self.priority, SOURCE, "priority_keys").clone()
    }

    /// All registrations in registration order.
    pub fn registrations(&self) -> Vec<Registration> {
        let mut all: Vec<Registration> = lock::read(&self.registrations, SOURCE, "registrations")
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|registration| registration.seq);
        all
    }

    pub fn len(&self) -> usize {
        lock::read(&self.registrations, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn priority_count(&self) -> usize {
        lock::read(&self.priority, SOURCE, "priority_count").len()
    }
}

impl Default for FetchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
