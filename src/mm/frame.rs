//! Physical Frame Allocation
//!
//! The rest of the core only sees the [`FrameAllocator`] trait: one call
//! to get a zeroed 4 KiB frame, one to give it back, and a direct-map
//! lookup from a physical address to a kernel pointer.
//!
//! [`FramePool`] is the concrete allocator: a page-aligned arena handed to
//! a `linked_list_allocator::Heap` that only ever serves page-sized,
//! page-aligned blocks.
//!
//! # Security Properties
//! - All allocated frames are zeroed before returning
//! - Frees outside the managed range cause a panic
//! - The heap is protected by a spinlock

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use linked_list_allocator::Heap;
use spin::Mutex;

use super::address::{PhysAddr, PAGE_SIZE};

/// Physical address the host-backed pool pretends its arena starts at.
/// Sits above the first 4 MiB so that frame 0 is never handed out.
pub const DEFAULT_PHYS_BASE: u32 = 0x0040_0000;

/// Source of physical frames.
pub trait FrameAllocator: Send + Sync {
    /// Allocate one zeroed frame, or `None` when memory is exhausted.
    fn alloc_frame(&self) -> Option<PhysAddr>;

    /// Return a frame to the allocator.
    ///
    /// # Safety
    /// `frame` must come from `alloc_frame` on this allocator and must no
    /// longer be referenced by any page table.
    unsafe fn free_frame(&self, frame: PhysAddr);

    /// Kernel pointer to the first byte of `frame`.
    fn frame_ptr(&self, frame: PhysAddr) -> *mut u8;
}

/// Page layout used for every allocation.
const FRAME_LAYOUT: Layout = match Layout::from_size_align(PAGE_SIZE, PAGE_SIZE) {
    Ok(layout) => layout,
    Err(_) => panic!("invalid frame layout"),
};

/// Frame allocator over a contiguous, direct-mapped arena.
pub struct FramePool {
    heap: Mutex<Heap>,
    /// Kernel address of the arena (stored as an integer so the pool is `Sync`).
    base: usize,
    phys_base: u32,
    frames: usize,
    free: AtomicUsize,
    /// Whether `Drop` must give the arena back to the kernel heap.
    owned: bool,
}

impl FramePool {
    /// Build a pool over memory the caller already owns.
    ///
    /// # Safety
    /// `start` must be page aligned, valid for `frames * PAGE_SIZE` bytes,
    /// and used by nothing else for the lifetime of the pool. `phys_base`
    /// is the physical address that corresponds to `start`.
    pub unsafe fn from_region(start: *mut u8, frames: usize, phys_base: u32) -> Self {
        assert!(start as usize % PAGE_SIZE == 0, "frame arena must be page aligned");
        assert!(phys_base as usize % PAGE_SIZE == 0, "physical base must be page aligned");
        // SAFETY: caller guarantees exclusive ownership of the region.
        let heap = unsafe { Heap::new(start, frames * PAGE_SIZE) };
        Self {
            heap: Mutex::new(heap),
            base: start as usize,
            phys_base,
            frames,
            free: AtomicUsize::new(frames),
            owned: false,
        }
    }

    /// Carve an arena of `frames` pages out of the kernel heap.
    ///
    /// Returns `None` if the heap cannot satisfy the request.
    pub fn with_capacity(frames: usize) -> Option<Self> {
        if frames == 0 {
            return None;
        }
        let layout = Layout::from_size_align(frames * PAGE_SIZE, PAGE_SIZE).ok()?;
        // SAFETY: layout has non-zero size.
        let start = unsafe { alloc_zeroed(layout) };
        if start.is_null() {
            return None;
        }
        // SAFETY: freshly allocated, aligned and exclusively ours.
        let mut pool = unsafe { Self::from_region(start, frames, DEFAULT_PHYS_BASE) };
        pool.owned = true;
        Some(pool)
    }

    /// Total frames under management.
    pub fn capacity(&self) -> usize {
        self.frames
    }

    /// Number of frames currently free.
    pub fn free_frames(&self) -> usize {
        self.free.load(Ordering::Acquire)
    }

    /// Number of frames currently handed out.
    pub fn used_frames(&self) -> usize {
        self.frames - self.free_frames()
    }

    /// Check whether `frame` lies inside this pool.
    pub fn contains(&self, frame: PhysAddr) -> bool {
        let addr = frame.as_u32() as usize;
        let start = self.phys_base as usize;
        addr >= start && addr < start + self.frames * PAGE_SIZE
    }
}

impl FrameAllocator for FramePool {
    fn alloc_frame(&self) -> Option<PhysAddr> {
        let ptr = self.heap.lock().allocate_first_fit(FRAME_LAYOUT).ok()?;
        self.free.fetch_sub(1, Ordering::AcqRel);

        // SAFETY: the block was just allocated so we have exclusive access.
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, PAGE_SIZE) };

        let offset = ptr.as_ptr() as usize - self.base;
        Some(PhysAddr::new(self.phys_base + offset as u32))
    }

    unsafe fn free_frame(&self, frame: PhysAddr) {
        if !frame.is_aligned() {
            panic!("Attempted to free unaligned frame: {:?}", frame);
        }
        if !self.contains(frame) {
            panic!("Attempted to free frame outside managed range: {:?}", frame);
        }
        let ptr = self.frame_ptr(frame);
        // SAFETY: ptr is inside the arena and non-null; the caller
        // guarantees it came from `alloc_frame`.
        unsafe {
            self.heap
                .lock()
                .deallocate(NonNull::new_unchecked(ptr), FRAME_LAYOUT);
        }
        self.free.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    fn frame_ptr(&self, frame: PhysAddr) -> *mut u8 {
        debug_assert!(self.contains(frame), "frame {:?} outside pool", frame);
        (self.base + (frame.as_u32() - self.phys_base) as usize) as *mut u8
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Ok(layout) = Layout::from_size_align(self.frames * PAGE_SIZE, PAGE_SIZE) {
            // SAFETY: the arena was allocated in `with_capacity` with this layout.
            unsafe { dealloc(self.base as *mut u8, layout) };
        }
    }
}

impl core::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FramePool")
            .field("phys_base", &PhysAddr::new(self.phys_base))
            .field("frames", &self.frames)
            .field("free", &self.free_frames())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_aligned_and_zeroed() {
        let pool = FramePool::with_capacity(8).unwrap();
        let frame = pool.alloc_frame().unwrap();
        assert!(frame.is_aligned());
        assert!(pool.contains(frame));

        let ptr = pool.frame_ptr(frame);
        let bytes = unsafe { core::slice::from_raw_parts_mut(ptr, PAGE_SIZE) };
        assert!(bytes.iter().all(|&b| b == 0));

        // Dirty the frame, free it, and make sure the next one is clean.
        bytes.fill(0xAB);
        unsafe { pool.free_frame(frame) };
        let again = pool.alloc_frame().unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(pool.frame_ptr(again), PAGE_SIZE) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_accounting() {
        let pool = FramePool::with_capacity(4).unwrap();
        assert_eq!(pool.free_frames(), 4);
        let a = pool.alloc_frame().unwrap();
        let b = pool.alloc_frame().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.used_frames(), 2);
        unsafe {
            pool.free_frame(a);
            pool.free_frame(b);
        }
        assert_eq!(pool.free_frames(), 4);
    }

    #[test]
    fn test_exhaustion() {
        let pool = FramePool::with_capacity(2).unwrap();
        let mut taken = alloc::vec::Vec::new();
        while let Some(frame) = pool.alloc_frame() {
            taken.push(frame);
        }
        assert!(!taken.is_empty());
        assert!(pool.alloc_frame().is_none());
    }

    #[test]
    #[should_panic(expected = "outside managed range")]
    fn test_free_foreign_frame() {
        let pool = FramePool::with_capacity(1).unwrap();
        unsafe { pool.free_frame(PhysAddr::new(0x1000)) };
    }
}
