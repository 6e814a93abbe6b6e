//! Per-process Address Spaces
//!
//! An [`AddressSpace`] owns one page directory. Directory entries below
//! [`PRIVATE_FIRST_PDI`] are copied from the kernel's [`SharedRegion`] when
//! the space is created and are never touched again; entries from
//! `PRIVATE_FIRST_PDI` upwards point at page tables and data frames that
//! belong to this space alone.
//!
//! # Policy
//! - fork copies every resident private frame eagerly (no copy-on-write)
//! - exec and drop free every private frame and page table
//! - the shared region is read-only state, never copied or freed
//!
//! User memory is reached through the page tables rather than through
//! raw pointers: writes demand-allocate zeroed private pages, reads of
//! unmapped private pages return zeros.

use alloc::sync::Arc;

use super::address::{PhysAddr, VirtAddr, ENTRIES_PER_TABLE, PAGE_SIZE, PRIVATE_FIRST_PDI};
use super::frame::FrameAllocator;
use super::paging::{MapError, PageFlags, PageTable, PageTableEntry};

/// View a frame that holds a page table.
///
/// # Safety
/// `frame` must be a live page-table frame of `frames`, and the caller
/// must not create overlapping references to the same table.
#[inline]
unsafe fn table_at<'a>(frames: &'a dyn FrameAllocator, frame: PhysAddr) -> &'a mut PageTable {
    // SAFETY: frames are page aligned and sized, PageTable is a plain
    // 4 KiB array of u32 entries with no invalid bit patterns.
    unsafe { &mut *(frames.frame_ptr(frame) as *mut PageTable) }
}

/// Kernel mapping shared by every address space.
#[derive(Clone)]
pub struct SharedRegion {
    entries: [PageTableEntry; PRIVATE_FIRST_PDI],
}

impl SharedRegion {
    /// A shared region with no mappings at all.
    pub const fn empty() -> Self {
        Self {
            entries: [PageTableEntry::invalid(); PRIVATE_FIRST_PDI],
        }
    }

    /// Identity-map physical memory `[0, end)` for the kernel.
    ///
    /// Page tables are allocated from `frames` and live for the lifetime
    /// of the kernel.
    pub fn identity_map(frames: &dyn FrameAllocator, end: u32) -> Result<Self, MapError> {
        if VirtAddr::new(end.saturating_sub(1)).is_user() {
            return Err(MapError::Overflow);
        }
        let mut region = Self::empty();
        let mut addr = 0u32;
        while addr < end {
            let (pdi, pti) = VirtAddr::new(addr).page_table_indices();
            if !region.entries[pdi].is_present() {
                let table = frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
                region.entries[pdi] = PageTableEntry::new(table, PageFlags::KERNEL_DATA);
            }
            // SAFETY: the table frame was allocated above and is only
            // referenced from this region.
            let table = unsafe { table_at(frames, region.entries[pdi].addr()) };
            table[pti] = PageTableEntry::new(PhysAddr::new(addr), PageFlags::KERNEL_DATA);
            addr += PAGE_SIZE as u32;
        }
        log::debug!("shared region: identity map up to {:#010x}", end);
        Ok(region)
    }

    /// Directory entry `pdi` of the shared region.
    #[inline]
    pub fn entry(&self, pdi: usize) -> PageTableEntry {
        self.entries[pdi]
    }
}

impl core::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let present = self.entries.iter().filter(|e| e.is_present()).count();
        write!(f, "SharedRegion({} tables)", present)
    }
}

/// Validate that `[va, va + len)` lies in the private region.
fn check_user_range(va: VirtAddr, len: usize) -> Result<(), MapError> {
    if !va.is_user() {
        return Err(MapError::NotUserAddress);
    }
    if len == 0 {
        return Ok(());
    }
    let last = u32::try_from(len - 1).map_err(|_| MapError::Overflow)?;
    va.checked_add(last).ok_or(MapError::Overflow)?;
    Ok(())
}

/// A process address space.
pub struct AddressSpace {
    directory: PhysAddr,
    frames: Arc<dyn FrameAllocator>,
}

impl AddressSpace {
    /// Allocate a fresh directory with `shared` attached and nothing private.
    pub fn new(frames: Arc<dyn FrameAllocator>, shared: &SharedRegion) -> Result<Self, MapError> {
        let directory = frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
        let space = Self { directory, frames };
        // SAFETY: freshly allocated and zeroed directory frame.
        let dir = unsafe { space.dir() };
        for pdi in 0..PRIVATE_FIRST_PDI {
            dir[pdi] = shared.entry(pdi);
        }
        Ok(space)
    }

    /// # Safety
    /// No other reference to the directory may be live.
    #[inline]
    unsafe fn dir(&self) -> &mut PageTable {
        // SAFETY: the directory frame is owned by this space.
        unsafe { table_at(&*self.frames, self.directory) }
    }

    /// Directory entry `pdi`.
    pub fn directory_entry(&self, pdi: usize) -> PageTableEntry {
        // SAFETY: short-lived read of our own directory.
        unsafe { self.dir()[pdi] }
    }

    /// Translate a virtual address to the physical address behind it.
    pub fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
        let (pdi, pti) = va.page_table_indices();
        let pde = self.directory_entry(pdi);
        if !pde.is_present() {
            return None;
        }
        // SAFETY: present directory entries point at live page tables.
        let pte = unsafe { table_at(&*self.frames, pde.addr())[pti] };
        if !pte.is_present() {
            return None;
        }
        Some(PhysAddr::new(pte.addr().as_u32() + va.page_offset() as u32))
    }

    /// Make sure the private page containing `va` is mapped, allocating a
    /// page table and a zeroed frame as needed. Returns the page's frame.
    pub fn ensure_page(&mut self, va: VirtAddr) -> Result<PhysAddr, MapError> {
        if !va.is_user() {
            return Err(MapError::NotUserAddress);
        }
        let (pdi, pti) = va.page_table_indices();
        // SAFETY: we hold `&mut self`, so no other view of the directory exists.
        let dir = unsafe { self.dir() };
        if !dir[pdi].is_present() {
            let table = self.frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
            dir[pdi] = PageTableEntry::new(table, PageFlags::USER_DATA);
        }
        // SAFETY: present private entries point at tables owned by us.
        let table = unsafe { table_at(&*self.frames, dir[pdi].addr()) };
        if !table[pti].is_present() {
            let frame = self.frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
            table[pti] = PageTableEntry::new(frame, PageFlags::USER_DATA);
        }
        Ok(table[pti].addr())
    }

    /// Copy user memory at `va` into `buf`.
    pub fn read(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), MapError> {
        check_user_range(va, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let cur = VirtAddr::new(va.as_u32() + done as u32);
            let chunk = (PAGE_SIZE - cur.page_offset()).min(buf.len() - done);
            let dst = &mut buf[done..done + chunk];
            match self.translate(cur) {
                Some(phys) => {
                    let src = self.frames.frame_ptr(phys.align_down());
                    // SAFETY: the frame is mapped in this space and the
                    // chunk never crosses its end.
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            src.add(cur.page_offset()),
                            dst.as_mut_ptr(),
                            chunk,
                        );
                    }
                }
                None => dst.fill(0),
            }
            done += chunk;
        }
        Ok(())
    }

    /// Copy `data` into user memory at `va`, mapping pages on demand.
    pub fn write(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), MapError> {
        check_user_range(va, data.len())?;
        let mut done = 0;
        while done < data.len() {
            let cur = VirtAddr::new(va.as_u32() + done as u32);
            let chunk = (PAGE_SIZE - cur.page_offset()).min(data.len() - done);
            let frame = self.ensure_page(cur)?;
            let dst = self.frames.frame_ptr(frame);
            // SAFETY: see `read`.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    data[done..].as_ptr(),
                    dst.add(cur.page_offset()),
                    chunk,
                );
            }
            done += chunk;
        }
        Ok(())
    }

    /// Zero `len` bytes of user memory starting at `va`.
    pub fn zero(&mut self, va: VirtAddr, len: usize) -> Result<(), MapError> {
        check_user_range(va, len)?;
        let mut done = 0;
        while done < len {
            let cur = VirtAddr::new(va.as_u32() + done as u32);
            let chunk = (PAGE_SIZE - cur.page_offset()).min(len - done);
            let frame = self.ensure_page(cur)?;
            // SAFETY: see `read`.
            unsafe {
                core::ptr::write_bytes(self.frames.frame_ptr(frame).add(cur.page_offset()), 0, chunk);
            }
            done += chunk;
        }
        Ok(())
    }

    /// Read a little-endian word of user memory.
    pub fn read_u32(&self, va: VirtAddr) -> Result<u32, MapError> {
        let mut word = [0u8; 4];
        self.read(va, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Write a little-endian word of user memory.
    pub fn write_u32(&mut self, va: VirtAddr, value: u32) -> Result<(), MapError> {
        self.write(va, &value.to_le_bytes())
    }

    /// Duplicate every resident private page of `self` into `child`.
    ///
    /// Child page tables are created when missing; pages the child already
    /// has are left alone. Returns the number of data frames copied.
    pub fn copy_private_into(&self, child: &mut AddressSpace) -> Result<usize, MapError> {
        let mut copied = 0;
        for pdi in PRIVATE_FIRST_PDI..ENTRIES_PER_TABLE {
            let parent_pde = self.directory_entry(pdi);
            if !parent_pde.is_present() {
                continue;
            }
            // SAFETY: present private entry of the parent.
            let parent_pt = unsafe { table_at(&*self.frames, parent_pde.addr()) };

            // SAFETY: we hold `&mut child`.
            let child_dir = unsafe { child.dir() };
            if !child_dir[pdi].is_present() {
                let table = child.frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
                child_dir[pdi] = PageTableEntry::new(table, PageFlags::USER_DATA);
            }
            // SAFETY: the child's table is distinct from the parent's.
            let child_pt = unsafe { table_at(&*child.frames, child_dir[pdi].addr()) };

            for (pti, parent_pte) in parent_pt.iter_present() {
                if child_pt[pti].is_present() {
                    continue;
                }
                let frame = child.frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
                // SAFETY: two distinct whole frames.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        self.frames.frame_ptr(parent_pte.addr()),
                        child.frames.frame_ptr(frame),
                        PAGE_SIZE,
                    );
                }
                child_pt[pti] = PageTableEntry::new(frame, PageFlags::USER_DATA);
                copied += 1;
            }
        }
        Ok(copied)
    }

    /// Free every private data frame and page table. Returns frames freed.
    pub fn clear_private(&mut self) -> usize {
        let mut freed = 0;
        // SAFETY: we hold `&mut self`.
        let dir = unsafe { self.dir() };
        for pdi in PRIVATE_FIRST_PDI..ENTRIES_PER_TABLE {
            let pde = dir[pdi];
            if !pde.is_present() {
                continue;
            }
            // SAFETY: present private entry, about to be torn down.
            let table = unsafe { table_at(&*self.frames, pde.addr()) };
            for (_, pte) in table.iter_present() {
                // SAFETY: the frame is referenced only by this table.
                unsafe { self.frames.free_frame(pte.addr()) };
                freed += 1;
            }
            // SAFETY: the table is unlinked right after.
            unsafe { self.frames.free_frame(pde.addr()) };
            dir[pdi].clear();
            freed += 1;
        }
        freed
    }

    /// Number of resident private data pages.
    pub fn private_pages(&self) -> usize {
        (PRIVATE_FIRST_PDI..ENTRIES_PER_TABLE)
            .map(|pdi| self.directory_entry(pdi))
            .filter(|pde| pde.is_present())
            // SAFETY: present private entries point at live tables.
            .map(|pde| unsafe { table_at(&*self.frames, pde.addr()) }.iter_present().count())
            .sum()
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.clear_private();
        // SAFETY: the directory is unreachable once the space is gone.
        unsafe { self.frames.free_frame(self.directory) };
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("directory", &self.directory)
            .field("private_pages", &self.private_pages())
            .finish()
    }
}
