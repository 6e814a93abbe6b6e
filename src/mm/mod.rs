//! Memory management
//!
//! Provides:
//! - 32-bit physical and virtual address types
//! - Two-level page table entries and flags
//! - Physical frame allocation
//! - Per-process address spaces with a shared kernel region
//!
//! # Security Principles
//! - User memory is only reached through the owning page tables
//! - Frames are zeroed before they are handed out
//! - Unsafe code is minimal and confined to frame access

pub mod address;
pub mod frame;
pub mod paging;
pub mod space;

pub use address::{PhysAddr, VirtAddr, PAGE_SIZE, USER_BASE};
pub use frame::{FrameAllocator, FramePool};
pub use paging::{MapError, PageFlags, PageTableEntry};
pub use space::{AddressSpace, SharedRegion};
