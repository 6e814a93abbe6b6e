//! One-shot Future
//!
//! A value written exactly once and read any number of times; readers
//! that arrive before the write block until it happens. Used to carry a
//! process's exit status to whoever waits on it.

use alloc::sync::Arc;
use spin::Once;

use crate::sched::Scheduler;

use super::WaitQueue;

/// Error type for future operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureError {
    /// The future already holds a value.
    AlreadySet,
}

impl core::fmt::Display for FutureError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadySet => write!(f, "future already set"),
        }
    }
}

/// A single-write, blocking-read value.
pub struct Future<T> {
    cell: Once<T>,
    readers: WaitQueue,
}

impl<T> Future<T> {
    /// Create an unset future.
    pub fn new(sched: Arc<dyn Scheduler>) -> Self {
        Self {
            cell: Once::new(),
            readers: WaitQueue::new(sched),
        }
    }

    /// Publish `value` and wake every blocked reader. Only the first call
    /// succeeds.
    pub fn set(&self, value: T) -> Result<(), FutureError> {
        let mut stored = false;
        self.cell.call_once(|| {
            stored = true;
            value
        });
        if !stored {
            return Err(FutureError::AlreadySet);
        }
        self.readers.wake_all();
        Ok(())
    }
}

impl<T: Copy> Future<T> {
    /// Read the value if it has been published.
    pub fn try_get(&self) -> Option<T> {
        self.cell.get().copied()
    }

    /// Read the value, blocking until it is published.
    pub fn get(&self) -> T {
        self.readers.wait_for(|| self.try_get())
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.cell.get() {
            Some(v) => write!(f, "Future({:?})", v),
            None => write!(f, "Future(<pending>)"),
        }
    }
}
