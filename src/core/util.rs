// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
pub struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Attempts to set the status to the given value and notifies all waiting
    /// threads.
    ///
    /// Fails if the [`Mutex`] is poisoned.
    pub fn try_notify_all(&self, t: T) -> Result<(), PoisonError<MutexGuard<'_, T>>> {
        *self.mutex.lock()? = t;
        self.condvar.notify_all();
        Ok(())
    }

    /// Sets the status to the given value and notifies all waiting threads.
    pub fn notify_all(&self, t: T) {
        *self.mutex.lock().unwrap() = t;
        self.condvar.notify_all();
    }

    /// Notifies one waiting thread, without changing the status.
    ///
    /// The mutex is acquired before notifying, so that a waiter that checked
    /// its predicate under the lock cannot miss this notification.
    pub fn notify_one(&self) {
        let _guard = self.mutex.lock().unwrap();
        self.condvar.notify_one();
    }

    /// Waits until the predicate is false on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify the
    /// status.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<'_, T> {
        self.condvar
            .wait_while(self.mutex.lock().unwrap(), predicate)
            .unwrap()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn status_wakes_waiter() {
        let status = Arc::new(Status::new(0));

        let waiter = std::thread::spawn({
            let status = status.clone();
            move || *status.wait_while(|value| *value == 0)
        });

        status.notify_all(42);
        assert_eq!(waiter.join().unwrap(), 42);
    }

    #[test]
    fn status_wait_returns_immediately_when_predicate_is_false() {
        let status = Status::new(1);
        let guard = status.wait_while(|value| *value == 0);
        assert_eq!(*guard, 1);
    }

    #[test]
    fn status_notify_one_keeps_value() {
        let status = Arc::new(Status::new(7));
        status.notify_one();
        assert_eq!(*status.wait_while(|_| false), 7);
    }

    #[test]
    fn status_try_notify_all_fails_on_poison() {
        let status = Arc::new(Status::new(0));
        let result = std::thread::spawn({
            let status = status.clone();
            move || {
                let _guard = status.mutex.lock().unwrap();
                panic!("poisoning the mutex");
            }
        })
        .join();
        assert!(result.is_err());
        assert!(status.try_notify_all(1).is_err());
    }
}
