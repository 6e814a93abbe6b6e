//! Two-level Page Table Types
//!
//! A page directory holds 1024 entries, each covering 4 MiB and pointing
//! at a page table; a page table holds 1024 entries, each mapping one
//! 4 KiB frame. Both levels share the same entry format.
//!
//! # Security Properties
//! - Flags are strictly typed, raw bits never leak into callers
//! - Private mappings always carry `USER`, shared ones never do

use bitflags::bitflags;
use core::ops::{Index, IndexMut};

use super::address::{PhysAddr, ENTRIES_PER_TABLE};

bitflags! {
    /// Page table entry flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Entry is present.
        const PRESENT = 1 << 0;
        /// Mapping is writable.
        const WRITABLE = 1 << 1;
        /// Mapping is reachable from user mode.
        const USER = 1 << 2;
    }
}

impl PageFlags {
    /// Kernel data: present and writable, supervisor only.
    pub const KERNEL_DATA: Self = Self::PRESENT.union(Self::WRITABLE);

    /// User data: present, writable, user accessible.
    pub const USER_DATA: Self = Self::PRESENT.union(Self::WRITABLE).union(Self::USER);
}

/// A single page directory or page table entry.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    /// Address mask (bits [31:12]).
    const ADDR_MASK: u32 = 0xFFFF_F000;

    /// Create an invalid (empty) entry.
    #[inline]
    pub const fn invalid() -> Self {
        Self(0)
    }

    /// Create an entry pointing at `frame` with `flags`.
    #[inline]
    pub fn new(frame: PhysAddr, flags: PageFlags) -> Self {
        debug_assert!(frame.is_aligned());
        Self((frame.as_u32() & Self::ADDR_MASK) | flags.bits())
    }

    /// Check if the entry is present.
    #[inline]
    pub fn is_present(self) -> bool {
        self.flags().contains(PageFlags::PRESENT)
    }

    /// Get the physical address from this entry.
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        PhysAddr::new(self.0 & Self::ADDR_MASK)
    }

    /// Get the flags from this entry.
    #[inline]
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    /// Clear the entry (make invalid).
    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_present() {
            write!(f, "PTE(addr={}, flags={:?})", self.addr(), self.flags())
        } else {
            write!(f, "PTE(invalid)")
        }
    }
}

/// One level of the hierarchy, laid out exactly over a 4 KiB frame.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

impl PageTable {
    /// Iterate over all present entries with their indices.
    pub fn iter_present(&self) -> impl Iterator<Item = (usize, PageTableEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.is_present())
    }
}

impl Index<usize> for PageTable {
    type Output = PageTableEntry;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

/// Error type for page mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// No physical frames available.
    OutOfMemory,
    /// The address is outside the private region.
    NotUserAddress,
    /// The access runs past the end of the 32-bit address space.
    Overflow,
}

impl core::fmt::Display for MapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of physical frames"),
            Self::NotUserAddress => write!(f, "address outside the private region"),
            Self::Overflow => write!(f, "access wraps the address space"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_encoding() {
        let e = PageTableEntry::new(PhysAddr::new(0x0040_3000), PageFlags::USER_DATA);
        assert!(e.is_present());
        assert_eq!(e.addr(), PhysAddr::new(0x0040_3000));
        assert_eq!(e.flags(), PageFlags::USER_DATA);
        assert_eq!(PageFlags::USER_DATA.bits(), 7);
    }

    #[test]
    fn test_invalid_entry() {
        let mut e = PageTableEntry::new(PhysAddr::new(0x1000), PageFlags::KERNEL_DATA);
        e.clear();
        assert!(!e.is_present());
        assert_eq!(e, PageTableEntry::invalid());
    }

    #[test]
    fn test_table_fills_one_frame() {
        assert_eq!(core::mem::size_of::<PageTable>(), 4096);
    }
}
