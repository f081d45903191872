//! Reference-counted system wakeup source.
//!
//! Holders keep the AP out of system suspend while the IPA has data for it. Only the first
//! acquire and the last release reach the wake source.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::hw::WakeSource;

pub struct WakeLock {
    count: Mutex<u32>,
    source: Arc<dyn WakeSource>,
}

impl WakeLock {
    pub fn new(source: Arc<dyn WakeSource>) -> Self {
        Self {
            count: Mutex::new(0),
            source,
        }
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        self.count
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn count(&self) -> u32 {
        *self.lock()
    }

    pub fn acquire(&self) {
        let mut count = self.lock();
        *count += 1;
        if *count == 1 {
            self.source.stay_awake();
        }
        tracing::debug!(count = *count, "wakelock acquired");
    }

    /// # Panics
    ///
    /// If there is no outstanding acquire.
    pub fn release(&self) {
        let mut count = self.lock();
        if *count == 0 {
            drop(count);
            tracing::error!("wakelock released with count already 0");
            panic!("wakelock released with count already 0");
        }
        *count -= 1;
        if *count == 0 {
            self.source.relax();
        }
        tracing::debug!(count = *count, "wakelock released");
    }
}

impl std::fmt::Debug for WakeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeLock")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}
