//! Poison-recovering lock extension trait.
//!
//! The watched-name sets are shared between the event loop and the bus
//! listener threads. A panic in one listener must not take the whole session
//! down with a poisoned `Mutex`, so the inner data is recovered instead.
//!
//! Usage:
//! ```ignore
//! use crate::lock_ext::MutexExt;
//!
//! let names = watched.lock_poisoned();
//! ```

use std::sync::{Mutex, MutexGuard};

/// Extension trait that adds a poison-recovering `lock` to `Mutex`.
pub trait MutexExt<T> {
    /// Acquire the mutex, recovering from a poisoned state.
    fn lock_poisoned(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    fn lock_poisoned(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| {
            log::warn!("Recovered poisoned Mutex (a thread panicked while holding this lock)");
            e.into_inner()
        })
    }
}
