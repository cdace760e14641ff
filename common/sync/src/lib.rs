// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Non-poisoning replacements for `std::sync::Mutex`/`Condvar`.
//!
//! A panic while holding a `std::sync::Mutex` poisons it, and every later
//! `lock()` call returns `Err` forcing callers to either `unwrap()` (and
//! panic again, in a thread that likely had nothing to do with the original
//! panic) or thread a recovery path through code that has no sensible way
//! to recover. Device emulation code in this codebase holds these locks for
//! the lifetime of a single MMIO access; a panic there is a bug to fix, not
//! a condition the lock API should make every caller handle. These wrappers
//! drop the `Result` entirely and always return the guard.

use std::sync::Condvar as StdCondvar;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard as StdMutexGuard;
use std::time::Duration;

/// A `std::sync::Mutex` that never poisons: a panicking lock holder still
/// releases the lock, and subsequent `lock()` calls just get it.
#[derive(Debug, Default)]
pub struct Mutex<T: ?Sized>(StdMutex<T>);

impl<T> Mutex<T> {
    pub fn new(val: T) -> Self {
        Mutex(StdMutex::new(val))
    }

    pub fn into_inner(self) -> T {
        self.0.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the lock, blocking until it is available.
    ///
    /// Ignores poisoning: if a previous holder panicked while holding the
    /// lock, this returns the guard anyway rather than propagating the
    /// poison error.
    pub fn lock(&self) -> StdMutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.0.get_mut().unwrap_or_else(|e| e.into_inner())
    }
}

/// A `std::sync::Condvar` paired with this crate's non-poisoning `Mutex`.
#[derive(Debug, Default)]
pub struct Condvar(StdCondvar);

impl Condvar {
    pub fn new() -> Self {
        Condvar(StdCondvar::new())
    }

    pub fn notify_one(&self) {
        self.0.notify_one();
    }

    pub fn notify_all(&self) {
        self.0.notify_all();
    }

    pub fn wait<'a, T>(&self, guard: StdMutexGuard<'a, T>) -> StdMutexGuard<'a, T> {
        self.0.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    pub fn wait_timeout<'a, T>(
        &self,
        guard: StdMutexGuard<'a, T>,
        dur: Duration,
    ) -> (StdMutexGuard<'a, T>, bool) {
        match self.0.wait_timeout(guard, dur) {
            Ok((guard, result)) => (guard, result.timed_out()),
            Err(e) => {
                let (guard, result) = e.into_inner();
                (guard, result.timed_out())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::Mutex;

    #[test]
    fn survives_a_panicking_holder() {
        let mutex = Arc::new(Mutex::new(0));
        let other = mutex.clone();
        let result = thread::spawn(move || {
            let mut guard = other.lock();
            *guard += 1;
            panic!("boom");
        })
        .join();
        assert!(result.is_err());

        // A std::sync::Mutex would be poisoned here; this one just works.
        let guard = mutex.lock();
        assert_eq!(*guard, 1);
    }
}
