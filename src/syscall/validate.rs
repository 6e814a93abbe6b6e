//! System Call Input Validation
//!
//! Every pointer a user program hands the kernel is checked here before
//! the kernel touches the memory behind it.
//!
//! # Security Principles
//! - Validate ALL inputs before use
//! - Fail-secure: deny by default
//! - Pointers must lie in the private (user) region and must not name an
//!   interrupt-controller page base
//! - Ranges must not wrap the 32-bit address space
//! - User memory is copied into kernel buffers, never borrowed

use crate::config::KernelConfig;

use super::SyscallError;

/// A validated user-space range.
///
/// Only constructed after [`user_buffer`] has accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserBuffer {
    addr: u32,
    len: u32,
}

impl UserBuffer {
    /// First byte of the range.
    #[inline]
    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Validate a single user pointer.
///
/// # Security Checks
/// 1. Pointer is in the user region
/// 2. Pointer is not an interrupt-controller base
pub fn user_ptr(config: &KernelConfig, ptr: u32) -> Result<u32, SyscallError> {
    if ptr < config.user_base || config.is_apic(ptr) {
        log::debug!("syscall: rejected user pointer {:#010x}", ptr);
        return Err(SyscallError::Efault);
    }
    Ok(ptr)
}

/// Validate a user range of `len` bytes at `ptr`.
///
/// Zero-length ranges still need a valid pointer.
pub fn user_buffer(config: &KernelConfig, ptr: u32, len: u32) -> Result<UserBuffer, SyscallError> {
    user_ptr(config, ptr)?;
    if len > 0 && ptr.checked_add(len - 1).is_none() {
        log::debug!("syscall: range {:#010x}+{:#x} wraps", ptr, len);
        return Err(SyscallError::Efault);
    }
    Ok(UserBuffer { addr: ptr, len })
}
