//! Coalescing of concurrent misses.
//!
//! The first caller to miss on a key becomes the leader and publishes a shared
//! pending result; callers arriving before it settles await that same result
//! instead of invoking the fetch function again. Any waiter drives the shared
//! fill, so a cancelled leader does not strand the others. The entry is
//! cleared as soon as the fill settles.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use super::entry::ViewData;
use super::fetch::CacheError;

pub type PendingFill = Shared<BoxFuture<'static, Result<ViewData, CacheError>>>;

#[derive(Clone)]
struct Pending {
    id: u64,
    fill: PendingFill,
}

#[derive(Clone, Default)]
pub struct InFlightFetches {
    pending: Arc<DashMap<String, Pending>>,
    next_id: Arc<AtomicU64>,
}

impl InFlightFetches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the pending fill for `key`, or start one built by `start`.
    ///
    /// `start` only constructs the future; it runs when the returned handle is
    /// awaited. The boolean is true for the leader.
    pub fn join_or_start<F>(&self, key: &str, start: F) -> (PendingFill, bool)
    where
        F: FnOnce() -> BoxFuture<'static, Result<ViewData, CacheError>>,
    {
        match self.pending.entry(key.to_string()) {
            Entry::Occupied(occupied) => (occupied.get().fill.clone(), false),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let guard = InFlightGuard {
                    key: key.to_string(),
                    id,
                    pending: Arc::clone(&self.pending),
                };
                let work = start();
                let fill = async move {
                    let _guard = guard;
                    work.await
                }
                .boxed()
                .shared();
                vacant.insert(Pending {
                    id,
                    fill: fill.clone(),
                });
                (fill, true)
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Keeps a key's pending fill visible to joiners until dropped.
struct InFlightGuard {
    key: String,
    id: u64,
    pending: Arc<DashMap<String, Pending>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let id = self.id;
        self.pending.remove_if(&self.key, |_, pending| pending.id == id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn joiners_share_the_leaders_result() {
        let inflight = InFlightFetches::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let counter = Arc::clone(&starts);
        let (leader, is_leader) = inflight.join_or_start("summary", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let _ = gate.await;
                Ok(Arc::new(json!("fresh")))
            }
            .boxed()
        });
        assert!(is_leader);

        let counter = Arc::clone(&starts);
        let (follower, is_leader) = inflight.join_or_start("summary", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Arc::new(json!("duplicate"))) }.boxed()
        });
        assert!(!is_leader);
        assert!(inflight.contains("summary"));

        let _ = release.send(());
        let (a, b) = tokio::join!(leader, follower);
        assert_eq!(a.ok().map(|v| (*v).clone()), Some(json!("fresh")));
        assert_eq!(b.ok().map(|v| (*v).clone()), Some(json!("fresh")));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn a_cancelled_leader_does_not_strand_joiners() {
        let inflight = InFlightFetches::new();
        let (leader, _) = inflight.join_or_start("summary", || {
            async {
                tokio::task::yield_now().await;
                Ok(Arc::new(json!(1)))
            }
            .boxed()
        });
        let (follower, is_leader) =
            inflight.join_or_start("summary", || async { Ok(Arc::new(json!(2))) }.boxed());
        assert!(!is_leader);

        drop(leader);
        let value = follower.await.expect("follower drives the fill");
        assert_eq!(*value, json!(1));
        assert!(!inflight.contains("summary"));
    }
}
