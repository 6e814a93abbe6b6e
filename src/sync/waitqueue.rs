//! Wait Queue
//!
//! Threads that cannot make progress register here and block in the
//! scheduler; code that changes the condition wakes one or all of them.
//! A woken thread rechecks its condition and re-registers if it lost the
//! race, so wakes are hints and never hand over ownership.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::Mutex;

use crate::sched::{Scheduler, ThreadId};

/// FIFO queue of blocked threads.
pub struct WaitQueue {
    waiters: Mutex<VecDeque<ThreadId>>,
    sched: Arc<dyn Scheduler>,
}

impl WaitQueue {
    /// Creates an empty wait queue.
    pub fn new(sched: Arc<dyn Scheduler>) -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
            sched,
        }
    }

    /// Add `thread` to the back of the queue unless it is already queued.
    pub fn register(&self, thread: ThreadId) {
        let mut waiters = self.waiters.lock();
        if !waiters.contains(&thread) {
            waiters.push_back(thread);
        }
    }

    /// Remove `thread` from the queue, if present.
    pub fn cancel(&self, thread: ThreadId) {
        self.waiters.lock().retain(|&t| t != thread);
    }

    /// Number of queued threads.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `attempt` until it yields a value, blocking between tries.
    ///
    /// The caller is queued before the second try, so a wake issued
    /// between a failed try and the block is not lost.
    pub fn wait_for<R>(&self, mut attempt: impl FnMut() -> Option<R>) -> R {
        if let Some(value) = attempt() {
            return value;
        }
        let me = self.sched.current();
        loop {
            self.register(me);
            if let Some(value) = attempt() {
                self.cancel(me);
                return value;
            }
            self.sched.block_current();
            if let Some(value) = attempt() {
                self.cancel(me);
                return value;
            }
        }
    }

    /// Wakes one waiting thread (FIFO order).
    pub fn wake_one(&self) {
        let next = self.waiters.lock().pop_front();
        if let Some(thread) = next {
            self.sched.wake(thread);
        }
    }

    /// Wakes all waiting threads.
    pub fn wake_all(&self) {
        let all: VecDeque<ThreadId> = core::mem::take(&mut *self.waiters.lock());
        for thread in all {
            self.sched.wake(thread);
        }
    }
}

impl core::fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "WaitQueue({} waiting)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HostScheduler;

    #[test]
    fn test_wake_one_fifo() {
        let sched = HostScheduler::new();
        let wq = WaitQueue::new(sched.clone());
        wq.register(ThreadId(1));
        wq.register(ThreadId(2));
        wq.register(ThreadId(1));
        assert_eq!(wq.len(), 2);

        wq.wake_one();
        assert_eq!(sched.woken(), [ThreadId(1)]);
        assert_eq!(wq.len(), 1);
    }

    #[test]
    fn test_wake_all_and_cancel() {
        let sched = HostScheduler::new();
        let wq = WaitQueue::new(sched.clone());
        for id in 1..=3 {
            wq.register(ThreadId(id));
        }
        wq.cancel(ThreadId(2));
        wq.wake_all();
        assert_eq!(sched.woken(), [ThreadId(1), ThreadId(3)]);
        assert!(wq.is_empty());

        wq.wake_one();
        assert_eq!(sched.woken().len(), 2);
    }

    #[test]
    fn test_ready_condition_never_blocks() {
        let sched = HostScheduler::new();
        let wq = WaitQueue::new(sched.clone());
        assert_eq!(wq.wait_for(|| Some(5)), 5);
        assert_eq!(sched.blocks(), 0);
        assert!(wq.is_empty());
    }
}
