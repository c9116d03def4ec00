// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lock helpers that recover from poisoning.
//!
//! The job registry and the in-memory file service sit behind `std` RwLocks
//! shared across tasks. A panic inside one job must not take every later
//! registry lookup down with it, so poisoned guards are logged and recovered.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "sharefetch::locks",
                event = "LOCK_POISONED_READ",
                "RwLock was poisoned during read acquisition; recovering data"
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "sharefetch::locks",
                event = "LOCK_POISONED_WRITE",
                "RwLock was poisoned during write acquisition; recovering data"
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_resilient_write_then_read() {
        let lock = RwLock::new(vec![1u64]);
        resilient_write(&lock).push(2);
        assert_eq!(*resilient_read(&lock), vec![1, 2]);
    }

    #[test]
    fn test_recovers_after_panicking_writer() {
        let lock = Arc::new(RwLock::new(7u64));
        let lock_clone = Arc::clone(&lock);

        let handle = thread::spawn(move || {
            let _guard = lock_clone.write().unwrap();
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        *resilient_write(&lock) += 1;
        assert_eq!(*resilient_read(&lock), 8);
    }
}
