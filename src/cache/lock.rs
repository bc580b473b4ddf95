//! Poison-tolerant lock access for the cache's shared maps.
//!
//! Cache state is rebuildable from the fetch functions; a poisoned lock is
//! logged and recovered.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(
    poisoned: PoisonError<G>,
    source: &'static str,
    op: &'static str,
    kind: &'static str,
) -> G {
    warn!(
        op,
        source_module = source,
        lock_kind = kind,
        result = "poisoned_recovered",
        "Recovered from poisoned view cache lock"
    );
    poisoned.into_inner()
}

pub(crate) fn read<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, source, op, "rwlock.read"))
}

pub(crate) fn write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, source, op, "rwlock.write"))
}

pub(crate) fn lock<'a, T>(
    mutex: &'a Mutex<T>,
    source: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| recover(poisoned, source, op, "mutex.lock"))
}
