//! Tracked background work.
//!
//! Prefetches and re-warms are spawned here instead of with a bare
//! `tokio::spawn`, so shutdown can abort whatever is still running and no
//! background fetch outlives the server.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinSet;
use tracing::{debug, info};

use super::lock;

const SOURCE: &str = "cache::tasks";

pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            set: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Spawn `task` on the current runtime.
    ///
    /// Returns false (and drops the task) once shutdown has begun.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            debug!(task = name, "background task refused: shutting down");
            return false;
        }

        let mut set = lock::lock(&self.set, SOURCE, "spawn");
        // Reap finished tasks so the set only holds live work.
        while set.try_join_next().is_some() {}
        set.spawn(task);
        true
    }

    /// Number of tasks that have not been reaped yet.
    pub fn len(&self) -> usize {
        let mut set = lock::lock(&self.set, SOURCE, "len");
        while set.try_join_next().is_some() {}
        set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new tasks, abort running ones and wait for them to unwind.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut set = {
            let mut guard = lock::lock(&self.set, SOURCE, "shutdown");
            std::mem::take(&mut *guard)
        };
        let pending = set.len();
        set.abort_all();
        while set.join_next().await.is_some() {}
        info!(aborted = pending, "background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
