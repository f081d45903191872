//! Lock types used by the active-clients gate.
//!
//! Under `--features loom` the unit tests swap in Loom's model-checked primitives.

#[cfg(all(feature = "loom", test))]
pub(crate) use loom::sync::{Mutex, MutexGuard};
#[cfg(not(all(feature = "loom", test)))]
pub(crate) use std::sync::{Mutex, MutexGuard};

pub(crate) use std::sync::TryLockError;

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// A panic while holding one of these locks is always a fatal consistency violation; the
/// diagnostic dump paths still need to read the state afterwards.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Try to lock a mutex without blocking. Returns `None` if it is held elsewhere.
pub(crate) fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}
