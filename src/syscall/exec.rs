//! Program Execution
//!
//! Replaces the caller's private address space with a freshly loaded
//! image and an argument stack.
//!
//! # Stack layout at entry (addresses grow up)
//! ```text
//! sp      -> argc
//! sp + 4  -> pointer to argv[0] slot
//! sp + 8  -> argv[0] .. argv[argc-1]
//!            NULL
//!            argument strings, argv[0] lowest
//!            padding
//! top     -> (config.user_stack_top)
//! ```
//!
//! Everything that can fail without side effects (lookup, header and
//! program header checks) is done before the private region is released.

use alloc::vec;
use alloc::vec::Vec;

use crate::elf::{self, LoadError};
use crate::kernel::Kernel;
use crate::mm::{AddressSpace, MapError, VirtAddr};
use crate::process::{Process, ProcessError};
use crate::sched::UserContext;

/// Exec error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// Path does not exist.
    NotFound,
    /// Path names something other than a regular file.
    NotAFile,
    /// Image rejected.
    Load(LoadError),
    /// Building the argument stack failed.
    Map(MapError),
    /// Process setup failed.
    Process(ProcessError),
}

impl ExecError {
    /// Whether the kernel must halt rather than fail the call.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Load(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<LoadError> for ExecError {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl From<MapError> for ExecError {
    fn from(e: MapError) -> Self {
        Self::Map(e)
    }
}

impl From<ProcessError> for ExecError {
    fn from(e: ProcessError) -> Self {
        Self::Process(e)
    }
}

impl core::fmt::Display for ExecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file"),
            Self::NotAFile => write!(f, "not a regular file"),
            Self::Load(e) => write!(f, "{}", e),
            Self::Map(e) => write!(f, "stack setup failed: {}", e),
            Self::Process(e) => write!(f, "{}", e),
        }
    }
}

fn push(space: &mut AddressSpace, sp: &mut u32, bytes: &[u8]) -> Result<u32, MapError> {
    *sp = sp.checked_sub(bytes.len() as u32).ok_or(MapError::Overflow)?;
    space.write(VirtAddr::new(*sp), bytes)?;
    Ok(*sp)
}

/// Lay out `argv` below `top` and return the initial stack pointer.
pub fn build_user_stack(space: &mut AddressSpace, top: u32, argv: &[Vec<u8>]) -> Result<u32, MapError> {
    let total: usize = argv.iter().map(|a| a.len() + 1).sum();
    let aligned = ((total + 4) / 4) * 4;
    let mut sp = top
        .checked_sub((aligned - total) as u32)
        .ok_or(MapError::Overflow)?;

    let mut addrs = vec![0u32; argv.len()];
    for (i, arg) in argv.iter().enumerate().rev() {
        let mut s = Vec::with_capacity(arg.len() + 1);
        s.extend_from_slice(arg);
        s.push(0);
        addrs[i] = push(space, &mut sp, &s)?;
    }

    push(space, &mut sp, &0u32.to_le_bytes())?;
    for &addr in addrs.iter().rev() {
        push(space, &mut sp, &addr.to_le_bytes())?;
    }
    let argv_ptr = sp;
    push(space, &mut sp, &argv_ptr.to_le_bytes())?;
    push(space, &mut sp, &(argv.len() as u32).to_le_bytes())?;
    Ok(sp)
}

/// Replace `process`'s image with the executable at `path`.
///
/// On success returns where to enter user mode; the caller's old private
/// memory is gone. Failures before the private region is released leave
/// the process untouched.
pub fn exec(
    kernel: &Kernel,
    process: &Process,
    path: &str,
    argv: &[Vec<u8>],
) -> Result<UserContext, ExecError> {
    let node = kernel.fs.find(path).ok_or(ExecError::NotFound)?;
    if !node.is_file() {
        return Err(ExecError::NotAFile);
    }
    elf::check(&*node, &kernel.config)?;

    log::info!("process {}: exec {:?} argc={}", process.pid(), path, argv.len());
    process.clear_private();

    let config = &kernel.config;
    let (sp, entry) = process.with_space(|space| -> Result<_, ExecError> {
        let sp = build_user_stack(space, config.user_stack_top, argv)?;
        let entry = elf::load(&*node, space, config)?;
        Ok((sp, entry))
    })?;

    Ok(UserContext { pc: entry, sp, eax: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ElfBuilder, Fixture};

    fn args(list: &[&str]) -> Vec<Vec<u8>> {
        list.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_stack_layout() {
        let fx = Fixture::new();
        let p = Process::new(&fx.kernel).unwrap();
        let top = 0xEFFF_E000;
        let argv = args(&["ls", "-l"]);

        let sp = p.with_space(|s| build_user_stack(s, top, &argv)).unwrap();

        // "ls\0-l\0" is 6 bytes: 2 bytes of padding keep the strings
        // ending 4-byte aligned.
        assert_eq!(p.read_user_u32(sp).unwrap(), 2);
        let argv_ptr = p.read_user_u32(sp + 4).unwrap();
        assert_eq!(argv_ptr, sp + 8);
        let a0 = p.read_user_u32(argv_ptr).unwrap();
        let a1 = p.read_user_u32(argv_ptr + 4).unwrap();
        assert_eq!(p.read_user_u32(argv_ptr + 8).unwrap(), 0);
        assert_eq!(a0, top - 8);
        assert_eq!(a1, top - 5);
        assert_eq!(argv_ptr + 12, a0);
        assert_eq!(p.read_user_cstr(a0, 16).unwrap(), b"ls");
        assert_eq!(p.read_user_cstr(a1, 16).unwrap(), b"-l");
        assert_eq!(sp, top - 28);
    }

    #[test]
    fn test_stack_without_args() {
        let fx = Fixture::new();
        let p = Process::new(&fx.kernel).unwrap();
        let sp = p.with_space(|s| build_user_stack(s, 0xEFFF_E000, &[])).unwrap();
        // 4 bytes padding, NULL, argv pointer, argc.
        assert_eq!(sp, 0xEFFF_E000 - 16);
        assert_eq!(p.read_user_u32(sp).unwrap(), 0);
        assert_eq!(p.read_user_u32(sp + 4).unwrap(), sp + 8);
        assert_eq!(p.read_user_u32(sp + 8).unwrap(), 0);
    }

    #[test]
    fn test_exec_replaces_image() {
        let fx = Fixture::new();
        let image = ElfBuilder::new(0x8000_0000)
            .segment(0x8000_0000, b"\xEB\xFE", 0x100)
            .build();
        fx.fs.add_file("/bin/loop", &image);

        let p = Process::new(&fx.kernel).unwrap();
        p.write_user(0xA000_0000, b"old image").unwrap();

        let ctx = exec(&fx.kernel, &p, "/bin/loop", &args(&["loop"])).unwrap();
        assert_eq!(ctx.pc, 0x8000_0000);
        assert_eq!(ctx.eax, 0);
        assert_eq!(p.read_user_u32(ctx.sp).unwrap(), 1);

        let mut old = [0u8; 9];
        p.read_user(0xA000_0000, &mut old).unwrap();
        assert_eq!(old, [0; 9]);
    }

    #[test]
    fn test_exec_failures_leave_process_intact() {
        let fx = Fixture::new();
        fx.fs.add_file("/not-elf", b"#!/bin/sh\n");
        fx.fs.add_dir("/bin");

        let p = Process::new(&fx.kernel).unwrap();
        p.write_user(0x8000_0000, b"keep").unwrap();

        assert_eq!(exec(&fx.kernel, &p, "/missing", &[]), Err(ExecError::NotFound));
        assert_eq!(exec(&fx.kernel, &p, "/bin", &[]), Err(ExecError::NotAFile));
        assert_eq!(
            exec(&fx.kernel, &p, "/not-elf", &[]),
            Err(ExecError::Load(LoadError::Truncated))
        );

        let mut buf = [0u8; 4];
        p.read_user(0x8000_0000, &mut buf).unwrap();
        assert_eq!(&buf, b"keep");
    }

    #[test]
    fn test_bad_program_headers_caught_before_teardown() {
        let fx = Fixture::new();
        let oversized = ElfBuilder::new(0x8000_0000)
            .segment(0x8000_0000, b"abcdef", 2)
            .build();
        let mut truncated = ElfBuilder::new(0x8000_0000)
            .segment(0x8000_0000, b"ok", 2)
            .build();
        truncated.truncate(elf::ELF_HEADER_SIZE + 8);
        fx.fs.add_file("/bin/oversized", &oversized);
        fx.fs.add_file("/bin/truncated", &truncated);

        let p = Process::new(&fx.kernel).unwrap();
        p.write_user(0x8000_0000, b"keep").unwrap();
        let pages = p.with_space(|s| s.private_pages());

        for path in ["/bin/oversized", "/bin/truncated"] {
            assert_eq!(
                exec(&fx.kernel, &p, path, &args(&["x"])),
                Err(ExecError::Load(LoadError::Malformed)),
                "{}",
                path
            );
        }

        let mut buf = [0u8; 4];
        p.read_user(0x8000_0000, &mut buf).unwrap();
        assert_eq!(&buf, b"keep");
        assert_eq!(p.with_space(|s| s.private_pages()), pages);
    }

    #[test]
    fn test_bad_segment_is_fatal() {
        let fx = Fixture::new();
        let image = ElfBuilder::new(0x1000).segment(0x1000, b"x", 1).build();
        fx.fs.add_file("/bin/bad", &image);
        let p = Process::new(&fx.kernel).unwrap();
        let err = exec(&fx.kernel, &p, "/bin/bad", &[]).unwrap_err();
        assert!(err.is_fatal());
    }
}
