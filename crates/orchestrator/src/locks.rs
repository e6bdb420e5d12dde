//! Per-scan serialization of record read-modify-write

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per scan id, created on first use.
#[derive(Debug, Default)]
pub(crate) struct ScanLocks {
    inner: DashMap<String, Arc<Mutex<()>>>,
}

impl ScanLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn acquire(&self, scan_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .entry(scan_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock for a scan nobody is holding or waiting on.
    pub(crate) fn release(&self, scan_id: &str) {
        self.inner
            .remove_if(scan_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}
