//! kproc - process and address-space core for a small x86 kernel
//!
//! Creates, forks, tears down and runs user processes, loads ELF32
//! executables into their address spaces, and dispatches the system calls
//! user programs make through interrupt 48.
//!
//! # Security Features
//! - Every user pointer is validated before the kernel touches it
//! - Handle-based access to files, semaphores and children
//! - Private memory is copied on fork and zeroed before reuse
//! - Images may only be loaded into the user region
//!
//! # Architecture
//! - Target: 32-bit x86, two-level paging, 4 KiB pages
//! - Shared kernel mapping below `0x8000_0000`, private user mapping above
//! - Filesystem, scheduler, console and physical memory are collaborators
//!   reached through the traits in [`fs`], [`sched`] and [`mm`]

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod cap;
pub mod config;
pub mod elf;
pub mod fs;
pub mod kernel;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod testing;

pub use config::KernelConfig;
pub use kernel::Kernel;
pub use process::{Process, ProcessError};
pub use sched::{Scheduler, UserContext};
pub use syscall::{dispatch, handle_trap, SyscallOutcome, TrapFrame};
