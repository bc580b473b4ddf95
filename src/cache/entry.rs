//! Cache entries.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

/// Resolved value of a view, shared between the store and its readers.
pub type ViewData = Arc<Value>;

/// One filled key. `expires_at` is always `created_at + ttl`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    data: ViewData,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    pub fn new(data: ViewData, created_at: Instant, ttl: Duration) -> Self {
        Self {
            data,
            created_at,
            ttl,
        }
    }

    pub fn data(&self) -> &ViewData {
        &self.data
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.created_at + self.ttl
    }

    /// TTL in effect when the entry was filled.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at()
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at().saturating_duration_since(now)
    }

    pub fn snapshot(&self, key: &str, now: Instant) -> EntrySnapshot {
        EntrySnapshot {
            key: key.to_string(),
            data: Arc::clone(&self.data),
            created_at: self.created_at,
            expires_at: self.expires_at(),
            ttl: self.ttl,
            age: now.saturating_duration_since(self.created_at),
            live: self.is_live(now),
        }
    }
}

/// Point-in-time view of an entry, for observability and tests.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub key: String,
    #[serde(skip)]
    pub data: ViewData,
    #[serde(skip)]
    pub created_at: Instant,
    #[serde(skip)]
    pub expires_at: Instant,
    pub ttl: Duration,
    pub age: Duration,
    pub live: bool,
}
