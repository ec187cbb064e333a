//! A counting semaphore bounding concurrent provider calls.
//!
//! The counter sits behind a single mutex; waiters park on a
//! [`tokio::sync::Notify`] and re-check the counter when woken. Waiters are
//! not served in FIFO order.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug)]
pub struct CountingSemaphore {
    capacity: usize,
    available: Mutex<usize>,
    notify: Notify,
}

impl CountingSemaphore {
    /// Creates a semaphore with `capacity` permits, all available.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "semaphore capacity must be at least 1");
        Self {
            capacity,
            available: Mutex::new(capacity),
            notify: Notify::new(),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits until a permit is available and takes it.
    ///
    /// Cancel-safe: dropping the future before it completes holds no permit.
    pub async fn acquire(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // await is not missed.
            notified.as_mut().enable();
            if self.try_acquire() {
                return;
            }
            notified.await;
        }
    }

    /// Takes a permit if one is free right now.
    pub fn try_acquire(&self) -> bool {
        let mut available = self.lock();
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    /// Waits up to `deadline` for a permit.
    ///
    /// Returns true iff a permit was taken. On false, no permit is held.
    pub async fn acquire_with_deadline(&self, deadline: Duration) -> bool {
        tokio::time::timeout(deadline, self.acquire()).await.is_ok()
    }

    /// Returns a permit.
    ///
    /// # Panics
    ///
    /// Panics if every permit is already available, which means a caller
    /// released one it never acquired.
    pub fn release(&self) {
        {
            let mut available = self.lock();
            assert!(
                *available < self.capacity,
                "semaphore released beyond its capacity of {}",
                self.capacity
            );
            *available += 1;
        }
        self.notify.notify_one();
    }

    /// Number of free permits at the moment of the call.
    ///
    /// Advisory only: the value may be stale by the time the caller looks at it.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        *self.lock()
    }

    /// Acquires a permit that is released when the returned guard drops.
    pub async fn permit(&self) -> Permit<'_> {
        self.acquire().await;
        Permit { semaphore: self }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        // The counter is a plain integer; a panic elsewhere cannot leave it torn.
        self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A held permit. Releases on drop.
#[derive(Debug)]
#[must_use = "the permit is released as soon as it is dropped"]
pub struct Permit<'a> {
    semaphore: &'a CountingSemaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
