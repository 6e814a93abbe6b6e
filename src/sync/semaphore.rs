//! Counting Semaphore
//!
//! `down` blocks while the count is zero; `up` never blocks and wakes one
//! waiter. Semaphores are shared by `Arc` between a parent and its forked
//! children, so an `up` in one process can release a `down` in another.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::sched::Scheduler;

use super::WaitQueue;

/// A counting semaphore.
pub struct Semaphore {
    count: AtomicU32,
    waiters: WaitQueue,
}

impl Semaphore {
    /// Create a semaphore with `initial` permits.
    pub fn new(initial: u32, sched: Arc<dyn Scheduler>) -> Self {
        Self {
            count: AtomicU32::new(initial),
            waiters: WaitQueue::new(sched),
        }
    }

    /// Take a permit if one is available right now.
    pub fn try_down(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .is_ok()
    }

    /// Take a permit, blocking until one is available.
    pub fn down(&self) {
        self.waiters.wait_for(|| self.try_down().then_some(()));
    }

    /// Return a permit.
    pub fn up(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
        self.waiters.wake_one();
    }

    /// Current number of permits.
    pub fn value(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

impl core::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Semaphore({})", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HostScheduler;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_counting() {
        let sem = Semaphore::new(2, HostScheduler::new());
        assert!(sem.try_down());
        assert!(sem.try_down());
        assert!(!sem.try_down());
        sem.up();
        assert_eq!(sem.value(), 1);
    }

    #[test]
    fn test_down_blocks_until_up() {
        let sem = Arc::new(Semaphore::new(0, HostScheduler::new()));
        let passed = Arc::new(AtomicBool::new(false));

        let waiter = {
            let sem = sem.clone();
            let passed = passed.clone();
            thread::spawn(move || {
                sem.down();
                passed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!passed.load(Ordering::SeqCst));
        sem.up();
        waiter.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn test_blocked_down_stays_off_cpu() {
        let sched = HostScheduler::new();
        let sem = Arc::new(Semaphore::new(0, sched.clone()));
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.down())
        };

        thread::sleep(Duration::from_millis(50));
        // Parked once, not polling.
        assert!(sched.blocks() <= 2, "blocked {} times", sched.blocks());
        sem.up();
        waiter.join().unwrap();
        assert!(sched.blocks() <= 3);
        assert!(!sched.woken().is_empty());
    }

    #[test]
    fn test_each_up_releases_one_waiter() {
        let sem = Arc::new(Semaphore::new(0, HostScheduler::new()));
        let waiters: std::vec::Vec<_> = (0..3)
            .map(|_| {
                let sem = sem.clone();
                thread::spawn(move || sem.down())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        for _ in 0..3 {
            sem.up();
        }
        for w in waiters {
            w.join().unwrap();
        }
        assert_eq!(sem.value(), 0);
    }
}
