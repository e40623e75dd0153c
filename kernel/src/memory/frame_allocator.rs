//! Bitmap physical frame allocator built from the firmware memory map.
//!
//! One bit per 4 KiB frame: set = locked (in a page table, a DMA buffer, or
//! kernel data), clear = free. The allocator walks the raw UEFI descriptor
//! array through a field-level view so it does not depend on firmware-side
//! struct definitions, and keeps three byte counters (total/free/used) plus a
//! rotating scan hint that amortizes the O(n) bitmap scan.
//!
//! Concurrency contract: callers go through the global `frame_allocator()`
//! spinlock and hold it only for the duration of a single operation.

use spin::Mutex;

use super::{AllocError, AllocResult, PAGE_SIZE};
use crate::log_debug;
use nimbus_shared::constants::memory::UEFI_CONVENTIONAL_MEMORY;

/// Field-level view over a raw UEFI `MemoryDescriptor`.
///
/// Descriptor layout per the UEFI spec: type @ 0, physical start @ 8,
/// page count @ 24. Reading the three fields directly keeps the allocator
/// standalone.
#[derive(Clone, Copy)]
struct MemoryDescriptorView {
    ptr: *const u8,
}

impl MemoryDescriptorView {
    unsafe fn new(ptr: *const u8) -> Self {
        Self { ptr }
    }

    unsafe fn kind(&self) -> u32 {
        core::ptr::read_unaligned(self.ptr as *const u32)
    }

    unsafe fn physical_start(&self) -> u64 {
        core::ptr::read_unaligned(self.ptr.add(8) as *const u64)
    }

    unsafe fn page_count(&self) -> u64 {
        core::ptr::read_unaligned(self.ptr.add(24) as *const u64)
    }
}

/// Source of physical frames for page-table construction and DMA setup.
/// Mapping helpers take an implementation as a parameter so the caller
/// controls lock scope.
pub trait FrameSource {
    fn alloc_frame(&mut self) -> Option<u64>;
}

/// Bitmap-backed allocator over the whole physical address space described by
/// the firmware memory map.
pub struct PageFrameAllocator {
    bitmap: *mut u64,
    bitmap_words: usize,
    total_frames: u64,
    usable_frames: u64,
    used_frames: u64,
    scan_hint: usize,
}

// The raw bitmap pointer is only reached through the global spinlock.
unsafe impl Send for PageFrameAllocator {}

impl PageFrameAllocator {
    pub const fn empty() -> Self {
        Self {
            bitmap: core::ptr::null_mut(),
            bitmap_words: 0,
            total_frames: 0,
            usable_frames: 0,
            used_frames: 0,
            scan_hint: 0,
        }
    }

    /// Build the bitmap from the firmware memory map.
    ///
    /// Every frame starts locked; conventional-memory regions are then
    /// released, and finally the bitmap's own storage and frame 0 are
    /// re-locked. Reserved and unusable firmware regions therefore never
    /// become allocatable.
    pub unsafe fn init_from_memory_map(&mut self, base: u64, descriptor_size: u64, count: u64) {
        let base_ptr = base as *const u8;

        // Pass 1: highest physical address and a home for the bitmap.
        let mut highest_addr: u64 = 0;
        let mut usable_frames: u64 = 0;
        let mut bitmap_home: u64 = 0;
        let mut bitmap_home_pages: u64 = 0;
        for i in 0..count {
            let desc = MemoryDescriptorView::new(base_ptr.add((i * descriptor_size) as usize));
            let start = desc.physical_start();
            let pages = desc.page_count();
            let end = start + pages * PAGE_SIZE as u64;
            if end > highest_addr {
                highest_addr = end;
            }
            if desc.kind() == UEFI_CONVENTIONAL_MEMORY {
                usable_frames += pages;
                if pages > bitmap_home_pages {
                    bitmap_home_pages = pages;
                    bitmap_home = start;
                }
            }
        }

        let total_frames = highest_addr / PAGE_SIZE as u64;
        let bitmap_words = ((total_frames + 63) / 64) as usize;
        let bitmap_bytes = bitmap_words * core::mem::size_of::<u64>();
        let bitmap_pages = (bitmap_bytes + PAGE_SIZE - 1) / PAGE_SIZE;
        // Never place the bitmap at physical 0; skip the first frame if the
        // chosen region starts there.
        if (bitmap_home_pages as usize) < bitmap_pages + 1 {
            crate::panic::halt_with_message("no memory region large enough for the frame bitmap");
        }
        let bitmap_addr = if bitmap_home == 0 {
            bitmap_home + PAGE_SIZE as u64
        } else {
            bitmap_home
        };

        self.bitmap = bitmap_addr as *mut u64;
        self.bitmap_words = bitmap_words;
        self.total_frames = total_frames;
        self.usable_frames = usable_frames;
        self.scan_hint = 0;

        // Everything locked by default.
        core::ptr::write_bytes(self.bitmap as *mut u8, 0xFF, bitmap_bytes);
        self.used_frames = total_frames;

        // Release conventional regions.
        for i in 0..count {
            let desc = MemoryDescriptorView::new(base_ptr.add((i * descriptor_size) as usize));
            if desc.kind() != UEFI_CONVENTIONAL_MEMORY {
                continue;
            }
            let start = desc.physical_start();
            let pages = desc.page_count();
            for page in 0..pages {
                self.release_frame_index(((start / PAGE_SIZE as u64) + page) as usize);
            }
        }

        // Re-lock the bitmap's own frames and frame 0.
        self.lock_pages(bitmap_addr, bitmap_pages as u64);
        self.lock_page(0);

        log_debug!(
            "frame allocator: {} frames tracked, bitmap at {:#x} ({} pages)",
            total_frames,
            bitmap_addr,
            bitmap_pages
        );
    }

    #[inline]
    fn bit_position(&self, index: usize) -> Option<(usize, u32)> {
        if index as u64 >= self.total_frames {
            return None;
        }
        Some((index / 64, (index % 64) as u32))
    }

    #[inline]
    fn frame_is_locked(&self, index: usize) -> bool {
        match self.bit_position(index) {
            Some((word, bit)) => unsafe { (*self.bitmap.add(word) & (1u64 << bit)) != 0 },
            None => true,
        }
    }

    /// Set the bit; returns true when the frame was previously free.
    #[inline]
    fn lock_frame_index(&mut self, index: usize) -> bool {
        if let Some((word, bit)) = self.bit_position(index) {
            let mask = 1u64 << bit;
            unsafe {
                let was_free = *self.bitmap.add(word) & mask == 0;
                *self.bitmap.add(word) |= mask;
                if was_free {
                    self.used_frames += 1;
                }
                was_free
            }
        } else {
            false
        }
    }

    /// Clear the bit; returns true when the frame was previously locked.
    #[inline]
    fn release_frame_index(&mut self, index: usize) -> bool {
        if let Some((word, bit)) = self.bit_position(index) {
            let mask = 1u64 << bit;
            unsafe {
                let was_locked = *self.bitmap.add(word) & mask != 0;
                *self.bitmap.add(word) &= !mask;
                if was_locked {
                    self.used_frames -= 1;
                }
                was_locked
            }
        } else {
            false
        }
    }

    /// Lock the frame containing `addr`.
    pub fn lock_page(&mut self, addr: u64) {
        self.lock_frame_index((addr / PAGE_SIZE as u64) as usize);
    }

    /// Lock `count` frames starting at the frame containing `addr`.
    pub fn lock_pages(&mut self, addr: u64, count: u64) {
        let first = (addr / PAGE_SIZE as u64) as usize;
        for i in 0..count as usize {
            self.lock_frame_index(first + i);
        }
    }

    /// Return a frame to the free pool. Freeing an already-free frame is
    /// reported as a double free.
    pub fn free_page(&mut self, addr: u64) -> AllocResult<()> {
        if addr % PAGE_SIZE as u64 != 0 {
            return Err(AllocError::InvalidArgument);
        }
        let index = (addr / PAGE_SIZE as u64) as usize;
        if index as u64 >= self.total_frames {
            return Err(AllocError::UnknownFrame);
        }
        if !self.release_frame_index(index) {
            return Err(AllocError::DoubleFree);
        }
        Ok(())
    }

    /// Allocate one frame, scanning from the rotating hint.
    pub fn alloc_page(&mut self) -> Option<u64> {
        let total = self.total_frames as usize;
        if total == 0 {
            return None;
        }
        let start = self.scan_hint % total;
        let mut index = start;
        loop {
            if !self.frame_is_locked(index) {
                self.lock_frame_index(index);
                self.scan_hint = index + 1;
                return Some(index as u64 * PAGE_SIZE as u64);
            }
            index = (index + 1) % total;
            if index == start {
                return None;
            }
        }
    }

    /// Allocate `count` physically contiguous frames. Used for the kernel
    /// heap backing and the frame bitmap's peers; scans from the start so the
    /// hint does not fragment long runs.
    pub fn alloc_contiguous(&mut self, count: usize) -> Option<u64> {
        if count == 0 {
            return None;
        }
        let total = self.total_frames as usize;
        let mut run_start = 0usize;
        let mut run_len = 0usize;
        for index in 0..total {
            if self.frame_is_locked(index) {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = index;
            }
            run_len += 1;
            if run_len == count {
                for i in run_start..run_start + count {
                    self.lock_frame_index(i);
                }
                return Some(run_start as u64 * PAGE_SIZE as u64);
            }
        }
        None
    }

    /// Allocate one zeroed frame.
    pub fn alloc_zeroed_page(&mut self) -> Option<u64> {
        let addr = self.alloc_page()?;
        unsafe {
            core::ptr::write_bytes(addr as *mut u8, 0, PAGE_SIZE);
        }
        Some(addr)
    }

    /// Total tracked memory in bytes.
    pub fn total_memory(&self) -> u64 {
        self.total_frames * PAGE_SIZE as u64
    }

    /// Free memory in bytes.
    pub fn free_memory(&self) -> u64 {
        (self.total_frames - self.used_frames) * PAGE_SIZE as u64
    }

    /// Locked memory in bytes.
    pub fn used_memory(&self) -> u64 {
        self.used_frames * PAGE_SIZE as u64
    }
}

impl FrameSource for PageFrameAllocator {
    fn alloc_frame(&mut self) -> Option<u64> {
        self.alloc_zeroed_page()
    }
}

static FRAME_ALLOCATOR: Mutex<PageFrameAllocator> = Mutex::new(PageFrameAllocator::empty());

/// The global frame allocator. Hold the lock only across a single operation;
/// in particular never across a heap call (lock ordering: heap before PFA).
pub fn frame_allocator() -> &'static Mutex<PageFrameAllocator> {
    &FRAME_ALLOCATOR
}
