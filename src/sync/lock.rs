//! Blocking Lock
//!
//! A mutex whose contended path blocks in the scheduler instead of
//! spinning on the lock word. Dropping the guard wakes one waiter.

use alloc::sync::Arc;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use spin::{Mutex, MutexGuard};

use crate::sched::Scheduler;

use super::WaitQueue;

/// Mutual exclusion that suspends, rather than spins, while contended.
pub struct BlockingLock<T> {
    inner: Mutex<T>,
    waiters: WaitQueue,
}

/// Exclusive access to the value behind a [`BlockingLock`].
pub struct BlockingLockGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    waiters: &'a WaitQueue,
}

impl<T> BlockingLock<T> {
    /// Wrap `value`.
    pub fn new(value: T, sched: Arc<dyn Scheduler>) -> Self {
        Self {
            inner: Mutex::new(value),
            waiters: WaitQueue::new(sched),
        }
    }

    /// Acquire the lock, blocking until it is free.
    pub fn lock(&self) -> BlockingLockGuard<'_, T> {
        let guard = self.waiters.wait_for(|| self.inner.try_lock());
        BlockingLockGuard {
            guard: ManuallyDrop::new(guard),
            waiters: &self.waiters,
        }
    }
}

impl<T> Deref for BlockingLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for BlockingLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for BlockingLockGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the guard is dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.waiters.wake_one();
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for BlockingLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.inner.try_lock() {
            Some(guard) => write!(f, "BlockingLock({:?})", &*guard),
            None => write!(f, "BlockingLock(<locked>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HostScheduler;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_contended_increments() {
        let sched = HostScheduler::new();
        let lock = Arc::new(BlockingLock::new(0u32, sched.clone()));

        let workers: std::vec::Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }

    #[test]
    fn test_waiter_blocks_until_release() {
        let sched = HostScheduler::new();
        let lock = Arc::new(BlockingLock::new(0u32, sched.clone()));
        let guard = lock.lock();

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || *lock.lock() += 1)
        };
        thread::sleep(Duration::from_millis(50));
        assert!(sched.blocks() <= 2, "blocked {} times", sched.blocks());
        assert_eq!(*guard, 0);

        drop(guard);
        waiter.join().unwrap();
        assert_eq!(*lock.lock(), 1);
        assert!(!sched.woken().is_empty());
    }
}
