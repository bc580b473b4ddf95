//! Fetch functions and the errors they surface through the cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Produces the current value of one logical view.
///
/// Implementations are opaque to the cache and must be idempotent reads:
/// the cache may call them again at any time (misses, prefetch, warming).
/// Any `Fn() -> impl Future<Output = Result<Value, FetchError>>` closure is a
/// fetcher.
#[async_trait]
pub trait ViewFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Value, FetchError>;
}

#[async_trait]
impl<F, Fut> ViewFetcher for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    async fn fetch(&self) -> Result<Value, FetchError> {
        (self)().await
    }
}

/// Shared handle to a fetch function, as stored in the registry.
pub type SharedFetcher = Arc<dyn ViewFetcher>;

/// Wrap a closure into a [`SharedFetcher`].
pub fn fetcher<F, Fut>(f: F) -> SharedFetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    Arc::new(f)
}

/// Failure reported by a fetch function.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("upstream request failed: {message}")]
    Upstream { message: String },
    #[error("upstream payload could not be decoded: {message}")]
    Decode { message: String },
}

impl FetchError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// Failure surfaced by the cache to its callers.
///
/// `Clone` so a single outcome can be handed to every caller waiting on a
/// coalesced fetch.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("fetch for `{key}` failed")]
    Fetch {
        key: String,
        #[source]
        source: FetchError,
    },
    #[error("fetch for `{key}` timed out after {after:?}")]
    Timeout { key: String, after: Duration },
    #[error("no fetch function registered for `{key}`")]
    NotRegistered { key: String },
}

impl CacheError {
    pub fn key(&self) -> &str {
        match self {
            CacheError::Fetch { key, .. }
            | CacheError::Timeout { key, .. }
            | CacheError::NotRegistered { key } => key,
        }
    }
}
