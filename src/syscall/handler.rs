//! System Call Handler
//!
//! Dispatches system calls and implements individual syscall handlers.
//!
//! # Security Considerations
//! - Unknown syscall numbers return -1
//! - The user stack pointer is validated before any argument is read
//! - Pointer arguments are validated before the memory behind them is
//!   copied in or out
//! - Handlers report typed errors; this is the only place they become -1

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::fs::{self, OpenFile};
use crate::kernel::Kernel;
use crate::mm::PAGE_SIZE;
use crate::process::Process;
use crate::sched::UserContext;

use super::exec::{self, ExecError};
use super::numbers::*;
use super::validate;
use super::{FatalError, SyscallError, SyscallOutcome, TrapFrame, SYSCALL_FAILED};

/// One system call in flight.
struct Call<'a> {
    kernel: &'a Kernel,
    process: &'a Arc<Process>,
    frame: &'a TrapFrame,
}

impl Call<'_> {
    /// Read argument word `index` from the user stack.
    fn arg(&self, index: u32) -> Result<u32, SyscallError> {
        let addr = self
            .frame
            .user_esp
            .checked_add(4 * index)
            .ok_or(SyscallError::Efault)?;
        let word = validate::user_buffer(&self.kernel.config, addr, 4)?;
        Ok(self.process.read_user_u32(word.addr())?)
    }

    /// Copy in a user path.
    fn path(&self, ptr: u32) -> Result<String, SyscallError> {
        let ptr = validate::user_ptr(&self.kernel.config, ptr)?;
        let bytes = self
            .process
            .read_user_cstr(ptr, self.kernel.config.max_user_string)?;
        String::from_utf8(bytes).map_err(|_| SyscallError::Enoent)
    }

    /// Exit always stops the thread, even when the status is unreadable.
    fn exit(&self) -> SyscallOutcome {
        let status = self.arg(1).unwrap_or_else(|e| {
            log::warn!("process {}: exit status unreadable: {}", self.process.pid(), e);
            SYSCALL_FAILED as u32
        });
        // A second exit still stops the thread.
        let _ = self.process.exit(status);
        SyscallOutcome::Exit
    }

    fn write(&self) -> Result<i32, SyscallError> {
        let fd = self.arg(1)? as i32;
        let buf = validate::user_buffer(&self.kernel.config, self.arg(2)?, self.arg(3)?)?;
        let file = self.process.get_file(fd)?;

        if buf.is_empty() {
            return Ok(file.write(&[])? as i32);
        }
        let mut chunk = vec![0u8; (buf.len() as usize).min(PAGE_SIZE)];
        let mut done = 0u32;
        while done < buf.len() {
            let len = ((buf.len() - done) as usize).min(PAGE_SIZE);
            self.process.read_user(buf.addr() + done, &mut chunk[..len])?;
            file.write(&chunk[..len])?;
            done += len as u32;
        }
        Ok(i32::try_from(done).unwrap_or(i32::MAX))
    }

    fn read(&self) -> Result<i32, SyscallError> {
        let fd = self.arg(1)? as i32;
        let buf = validate::user_buffer(&self.kernel.config, self.arg(2)?, self.arg(3)?)?;
        let file = self.process.get_file(fd)?;
        if file.is_console() {
            return Err(SyscallError::Enotsup);
        }

        let mut chunk = vec![0u8; (buf.len() as usize).min(PAGE_SIZE)];
        let mut done = 0u32;
        while done < buf.len() {
            let len = ((buf.len() - done) as usize).min(PAGE_SIZE);
            let got = file.read(&mut chunk[..len])?;
            if got == 0 {
                break;
            }
            self.process.write_user(buf.addr() + done, &chunk[..got])?;
            done += got as u32;
            if got < len {
                break;
            }
        }
        Ok(i32::try_from(done).unwrap_or(i32::MAX))
    }

    fn fork(&self) -> Result<i32, SyscallError> {
        let (child, handle) = self.process.fork(self.kernel)?;
        // The child resumes after the trap with 0 in eax.
        self.kernel.sched.spawn_user(
            child,
            UserContext {
                pc: self.frame.user_pc,
                sp: self.frame.user_esp,
                eax: 0,
            },
        );
        Ok(handle.encode())
    }

    fn sem(&self) -> Result<i32, SyscallError> {
        let initial = self.arg(1)?;
        Ok(self.process.new_semaphore(initial)?.encode())
    }

    fn up(&self) -> Result<i32, SyscallError> {
        self.process.get_semaphore(self.arg(1)? as i32)?.up();
        Ok(0)
    }

    fn down(&self) -> Result<i32, SyscallError> {
        let sem = self.process.get_semaphore(self.arg(1)? as i32)?;
        sem.down();
        Ok(0)
    }

    fn close(&self) -> Result<i32, SyscallError> {
        self.process.close(self.arg(1)? as i32)?;
        Ok(0)
    }

    fn wait(&self) -> Result<i32, SyscallError> {
        let child = self.arg(1)? as i32;
        let status_ptr = validate::user_buffer(&self.kernel.config, self.arg(2)?, 4)?;
        let status = self.process.wait(child)?;
        self.process.write_user_u32(status_ptr.addr(), status)?;
        Ok(0)
    }

    fn execl(&self) -> Result<SyscallOutcome, SyscallError> {
        let config = &self.kernel.config;
        let path_ptr = validate::user_ptr(config, self.arg(1)?)?;

        let mut arg_ptrs = Vec::new();
        loop {
            if arg_ptrs.len() == config.max_exec_args {
                log::error!("syscall: execl with {} or more args", config.max_exec_args);
                return Ok(SyscallOutcome::Fatal(FatalError::TooManyArgs));
            }
            let ptr = self.arg(arg_ptrs.len() as u32 + 2)?;
            if ptr == 0 {
                break;
            }
            arg_ptrs.push(validate::user_ptr(config, ptr)?);
        }

        let path = self.path(path_ptr)?;
        let argv = arg_ptrs
            .iter()
            .map(|&ptr| self.process.read_user_cstr(ptr, config.max_user_string))
            .collect::<Result<Vec<_>, _>>()?;

        match exec::exec(self.kernel, self.process, &path, &argv) {
            Ok(context) => Ok(SyscallOutcome::EnterUser(context)),
            Err(ExecError::Load(e)) if e.is_fatal() => {
                log::error!("syscall: execl {:?}: {}", path, e);
                Ok(SyscallOutcome::Fatal(FatalError::BadSegment(e)))
            }
            Err(e) => {
                log::debug!("syscall: execl {:?}: {}", path, e);
                Err(e.into())
            }
        }
    }

    fn open(&self) -> Result<i32, SyscallError> {
        let path = self.path(self.arg(1)?)?;
        let node = fs::resolve(&*self.kernel.fs, &path, self.kernel.config.max_symlink_hops)?;
        let fd = self.process.set_file(Arc::new(OpenFile::regular(node)))?;
        log::trace!("syscall: open {:?} -> {:?}", path, fd);
        Ok(fd.encode())
    }

    fn len(&self) -> Result<i32, SyscallError> {
        let file = self.process.get_file(self.arg(1)? as i32)?;
        Ok(file.size()? as i32)
    }

    fn seek(&self) -> Result<i32, SyscallError> {
        let fd = self.arg(1)? as i32;
        let offset = self.arg(2)? as i32;
        let file = self.process.get_file(fd)?;
        Ok(file.seek(offset)? as i32)
    }
}

fn finish(nr: u32, result: Result<i32, SyscallError>) -> SyscallOutcome {
    if let Err(e) = result {
        log::debug!("syscall #{} failed: {}", nr, e);
    }
    result.into()
}

/// Dispatch a system call
///
/// # Arguments
/// * `kernel` - Kernel context
/// * `current` - Process the calling thread belongs to
/// * `frame` - Call number and user registers saved by the trap stub
///
/// # Returns
/// What the trap glue must do next; see [`SyscallOutcome`].
///
/// # Security
/// - Unknown syscall numbers are rejected with -1
/// - Each handler validates its own arguments
pub fn dispatch(kernel: &Kernel, current: &Arc<Process>, frame: &TrapFrame) -> SyscallOutcome {
    log::trace!(
        "syscall #{} from process {} (pc={:#010x} esp={:#010x})",
        frame.eax,
        current.pid(),
        frame.user_pc,
        frame.user_esp
    );

    let call = Call {
        kernel,
        process: current,
        frame,
    };
    let nr = frame.eax;
    // Exit never returns to user space, whatever the stack looks like.
    if nr == SYS_EXIT {
        return call.exit();
    }
    if let Err(e) = validate::user_ptr(&kernel.config, frame.user_esp) {
        return finish(nr, Err(e));
    }

    match nr {
        SYS_WRITE => finish(nr, call.write()),
        SYS_FORK => finish(nr, call.fork()),
        SYS_SEM => finish(nr, call.sem()),
        SYS_UP => finish(nr, call.up()),
        SYS_DOWN => finish(nr, call.down()),
        SYS_CLOSE => finish(nr, call.close()),
        SYS_SHUTDOWN => {
            log::info!("syscall: shutdown requested by process {}", current.pid());
            SyscallOutcome::Shutdown
        }
        SYS_WAIT => finish(nr, call.wait()),
        SYS_EXECL => call.execl().unwrap_or_else(|e| finish(nr, Err(e))),
        SYS_OPEN => finish(nr, call.open()),
        SYS_LEN => finish(nr, call.len()),
        SYS_READ => finish(nr, call.read()),
        SYS_SEEK => finish(nr, call.seek()),
        _ => finish(nr, Err(SyscallError::Enosys)),
    }
}
