//! System Call Interface
//!
//! User programs enter the kernel through software interrupt 48 with the
//! call number in `eax`. Arguments are words on the user stack: word `i`
//! sits at `esp + 4*i`, word 0 being the return address pushed by the
//! user-side stub. The result goes back in `eax`.
//!
//! # Security Model
//! - Whitelist approach: only the calls below exist, anything else is -1
//! - The stack pointer and every pointer argument are validated before use
//! - Invalid inputs return -1 and leave process state untouched, never panic
//! - `-1` is the only failure value user space ever sees
//!
//! # Syscalls
//! - 0: exit(status)
//! - 1: write(fd, buf, n)
//! - 2: fork()
//! - 3: sem(initial)
//! - 4: up(sem)
//! - 5: down(sem)
//! - 6: close(handle)
//! - 7: shutdown()
//! - 8: wait(child, status_ptr)
//! - 9: execl(path, arg0, ..., NULL)
//! - 10: open(path)
//! - 11: len(fd)
//! - 12: read(fd, buf, n)
//! - 13: seek(fd, offset)

mod exec;
mod handler;
mod trap;
mod validate;

pub use exec::{build_user_stack, exec, ExecError};
pub use handler::dispatch;
pub use trap::{handle_trap, SYSCALL_VECTOR};
pub use validate::UserBuffer;

use crate::cap::HandleError;
use crate::elf::LoadError;
use crate::fs::FileError;
use crate::mm::MapError;
use crate::process::ProcessError;
use crate::sched::UserContext;

/// System call numbers
pub mod numbers {
    pub const SYS_EXIT: u32 = 0;
    pub const SYS_WRITE: u32 = 1;
    pub const SYS_FORK: u32 = 2;
    pub const SYS_SEM: u32 = 3;
    pub const SYS_UP: u32 = 4;
    pub const SYS_DOWN: u32 = 5;
    pub const SYS_CLOSE: u32 = 6;
    pub const SYS_SHUTDOWN: u32 = 7;
    pub const SYS_WAIT: u32 = 8;
    pub const SYS_EXECL: u32 = 9;
    pub const SYS_OPEN: u32 = 10;
    pub const SYS_LEN: u32 = 11;
    pub const SYS_READ: u32 = 12;
    pub const SYS_SEEK: u32 = 13;
}

/// Value returned to user space for every failed call.
pub const SYSCALL_FAILED: i32 = -1;

/// Registers saved by the trap entry stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    /// Call number on entry, result on exit.
    pub eax: u32,
    /// User instruction pointer after the `int` instruction.
    pub user_pc: u32,
    /// User stack pointer at the time of the trap.
    pub user_esp: u32,
}

/// System call error.
///
/// User space only ever sees [`SYSCALL_FAILED`]; the variants exist for
/// the kernel log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// Invalid system call number
    Enosys,
    /// Bad or wrong-kind handle
    Ebadf,
    /// Bad address (invalid pointer)
    Efault,
    /// Invalid argument
    Einval,
    /// No such file
    Enoent,
    /// Resource table full
    Emfile,
    /// Out of memory
    Enomem,
    /// Operation not supported on this file
    Enotsup,
    /// Not an executable image
    Enoexec,
    /// Exit status already published
    Esrch,
}

impl SyscallError {
    /// The value placed in the caller's `eax`.
    #[inline]
    pub const fn to_user(self) -> i32 {
        SYSCALL_FAILED
    }
}

impl core::fmt::Display for SyscallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Enosys => "no such system call",
            Self::Ebadf => "bad handle",
            Self::Efault => "bad address",
            Self::Einval => "invalid argument",
            Self::Enoent => "no such file",
            Self::Emfile => "table full",
            Self::Enomem => "out of memory",
            Self::Enotsup => "not supported",
            Self::Enoexec => "exec format error",
            Self::Esrch => "already exited",
        };
        f.write_str(s)
    }
}

impl From<HandleError> for SyscallError {
    fn from(e: HandleError) -> Self {
        match e {
            HandleError::TableFull(_) => Self::Emfile,
            _ => Self::Ebadf,
        }
    }
}

impl From<MapError> for SyscallError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::OutOfMemory => Self::Enomem,
            MapError::NotUserAddress | MapError::Overflow => Self::Efault,
        }
    }
}

impl From<FileError> for SyscallError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::NotFound | FileError::TooManyLinks | FileError::BadLink => Self::Enoent,
            FileError::NotSupported => Self::Enotsup,
            FileError::InvalidOffset => Self::Einval,
        }
    }
}

impl From<ProcessError> for SyscallError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::Handle(e) => e.into(),
            ProcessError::Map(e) => e.into(),
            ProcessError::AlreadyExited => Self::Esrch,
            ProcessError::StringTooLong => Self::Efault,
        }
    }
}

impl From<ExecError> for SyscallError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::NotFound => Self::Enoent,
            ExecError::NotAFile | ExecError::Load(_) => Self::Enoexec,
            ExecError::Map(e) => e.into(),
            ExecError::Process(e) => e.into(),
        }
    }
}

/// An unrecoverable condition raised by a system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// `execl` hit the argument limit.
    TooManyArgs,
    /// An executable tried to map a segment where none may go.
    BadSegment(LoadError),
}

impl core::fmt::Display for FatalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TooManyArgs => write!(f, "too many args in execl"),
            Self::BadSegment(e) => write!(f, "invalid segment: {}", e),
        }
    }
}

/// What the trap glue should do once a call has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Resume the caller with this value in `eax`.
    Return(i32),
    /// Abandon the caller's frame and enter user mode here (exec).
    EnterUser(UserContext),
    /// Stop the calling thread (exit).
    Exit,
    /// Power off.
    Shutdown,
    /// Halt the kernel.
    Fatal(FatalError),
}

impl From<Result<i32, SyscallError>> for SyscallOutcome {
    fn from(result: Result<i32, SyscallError>) -> Self {
        match result {
            Ok(value) => Self::Return(value),
            Err(e) => Self::Return(e.to_user()),
        }
    }
}
