//! Scheduler Interface
//!
//! Thread creation, context switching and the run queue live outside this
//! crate. The core only needs the handful of operations below.
//!
//! Blocking primitives in [`crate::sync`] never spin: a thread that cannot
//! make progress parks itself on a [`crate::sync::WaitQueue`] with
//! [`Scheduler::block_current`] and stays off the run queue until whoever
//! changes the condition calls [`Scheduler::wake`] for it.

use alloc::sync::Arc;

use crate::process::Process;

/// Opaque identity of a kernel thread, used to wake it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

/// User-mode register state needed to enter or resume a user thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserContext {
    /// Program counter to resume at.
    pub pc: u32,
    /// User stack pointer.
    pub sp: u32,
    /// Value placed in the result register (eax) on entry.
    pub eax: u32,
}

/// Operations the process core needs from the thread scheduler.
pub trait Scheduler: Send + Sync {
    /// The calling thread.
    fn current(&self) -> ThreadId;

    /// Suspend the calling thread until [`Scheduler::wake`] names it.
    ///
    /// A wake that arrives before the block is remembered, and the next
    /// block returns at once. A block may also return without a wake, so
    /// callers recheck their condition.
    fn block_current(&self);

    /// Make `thread` runnable again.
    fn wake(&self, thread: ThreadId);

    /// Create a new thread owned by `process` that enters user mode with
    /// `context`.
    fn spawn_user(&self, process: Arc<Process>, context: UserContext);

    /// Enter user mode on the current thread. Does not return.
    fn switch_to_user(&self, context: UserContext) -> !;

    /// Terminate the current thread. Does not return.
    fn stop(&self) -> !;

    /// Power the machine off. Does not return.
    fn shutdown(&self) -> !;

    /// Halt the kernel after an unrecoverable error. Does not return.
    fn halt(&self, reason: &str) -> !;
}
