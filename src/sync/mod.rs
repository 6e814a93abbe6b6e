//! Blocking synchronisation primitives
//!
//! Built on `spin` types, but every wait path blocks in the scheduler
//! through a [`WaitQueue`] instead of burning the CPU.

pub mod future;
pub mod lock;
pub mod semaphore;
pub mod waitqueue;

pub use future::{Future, FutureError};
pub use lock::{BlockingLock, BlockingLockGuard};
pub use semaphore::Semaphore;
pub use waitqueue::WaitQueue;
