//! Per-call advisory locking
//!
//! Transfers and transcript re-segmentation both rewrite a call's segments.
//! They serialize on the same per-call lock so neither reads a half-updated
//! segment list written by the other.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::call_record::CallId;

/// Keyed async mutexes, one per call
#[derive(Debug, Clone, Default)]
pub struct CallGuard {
    locks: Arc<DashMap<CallId, Arc<Mutex<()>>>>,
}

impl CallGuard {
    /// Create an empty guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a call
    pub async fn lock(&self, call_id: &CallId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(call_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits on
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of tracked calls
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no call is tracked
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
