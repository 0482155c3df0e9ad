//! Mutual exclusion for bulk operations.
//!
//! A bulk operation claims every `(therapist, date)` pair it may read or
//! write. Operations with disjoint claims run concurrently; overlapping ones
//! wait for the holder's guard to drop. The lock domain is an explicit value
//! handed to each coordinator, never a process-wide global.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

/// A therapist's day.
pub type LockKey = (String, NaiveDate);

/// Shared lock table. Clones share state.
#[derive(Clone, Default)]
pub struct ScheduleLocks {
    state: Arc<LockState>,
}

#[derive(Default)]
struct LockState {
    held: Mutex<HashSet<LockKey>>,
    released: Notify,
}

/// Holds a set of keys until dropped.
pub struct ScheduleGuard {
    state: Arc<LockState>,
    keys: BTreeSet<LockKey>,
}

impl ScheduleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until all `keys` are free, then claims them together.
    pub async fn acquire<I>(&self, keys: I) -> ScheduleGuard
    where
        I: IntoIterator<Item = LockKey>,
    {
        let keys: BTreeSet<LockKey> = keys.into_iter().collect();
        loop {
            let notified = self.state.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(guard) = self.claim(&keys) {
                return guard;
            }
            debug!(keys = keys.len(), "waiting for overlapping bulk operation");
            notified.await;
        }
    }

    /// Claims `keys` if none is held.
    pub fn try_acquire<I>(&self, keys: I) -> Option<ScheduleGuard>
    where
        I: IntoIterator<Item = LockKey>,
    {
        let keys: BTreeSet<LockKey> = keys.into_iter().collect();
        self.claim(&keys)
    }

    fn claim(&self, keys: &BTreeSet<LockKey>) -> Option<ScheduleGuard> {
        let mut held = self.state.held.lock();
        if keys.iter().any(|k| held.contains(k)) {
            return None;
        }
        held.extend(keys.iter().cloned());
        Some(ScheduleGuard {
            state: Arc::clone(&self.state),
            keys: keys.clone(),
        })
    }
}

impl ScheduleGuard {
    pub fn keys(&self) -> &BTreeSet<LockKey> {
        &self.keys
    }
}

impl Drop for ScheduleGuard {
    fn drop(&mut self) {
        {
            let mut held = self.state.held.lock();
            for key in &self.keys {
                held.remove(key);
            }
        }
        self.state.released.notify_waiters();
    }
}
