//! DMA-friendly contiguous buffer helpers.
//!
//! Device rings, contexts, and scratchpads need physically contiguous memory
//! with alignment and boundary constraints (ring segments must not straddle
//! a 64 KiB boundary, device contexts a 4 KiB one). `DmaBuffer` over-allocates
//! from the kernel heap, aligns the usable block to the boundary, zeroes it,
//! and marks its pages uncacheable. With the kernel identity-mapped, the
//! buffer's physical address equals its virtual address.

use alloc::alloc::{alloc, dealloc, Layout};

use super::{mark_page_uncacheable, AllocError, AllocResult, PAGE_SIZE};

/// Default boundary a DMA block must not cross.
pub const DMA_BOUNDARY: usize = 64 * 1024;

/// Contiguous, uncacheable, zeroed DMA buffer.
///
/// Exclusively owned by one driver structure; the xHCI driver deconfigures
/// the controller before any buffer it handed to hardware is dropped.
pub struct DmaBuffer {
    raw: *mut u8,
    layout: Layout,
    aligned: u64,
    size: usize,
}

unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    /// Allocate `size` bytes aligned to `align`, not crossing the default
    /// 64 KiB boundary.
    pub fn allocate(size: usize, align: usize) -> AllocResult<Self> {
        Self::allocate_with_boundary(size, align, DMA_BOUNDARY)
    }

    /// Allocate with an explicit boundary constraint. `boundary` must be a
    /// power of two no smaller than `align`, and `size` must fit inside one
    /// boundary window.
    pub fn allocate_with_boundary(size: usize, align: usize, boundary: usize) -> AllocResult<Self> {
        if size == 0 || size > boundary || !boundary.is_power_of_two() {
            return Err(AllocError::InvalidArgument);
        }
        let align = align.max(1);
        if !align.is_power_of_two() || align > boundary {
            return Err(AllocError::InvalidArgument);
        }

        // Aligning the block to the boundary itself satisfies both the
        // alignment and the no-crossing requirement, at the cost of slack.
        let total = size + boundary;
        let layout = match Layout::from_size_align(total, 8) {
            Ok(layout) => layout,
            Err(_) => return Err(AllocError::InvalidArgument),
        };
        let raw = unsafe { alloc(layout) };
        if raw.is_null() {
            return Err(AllocError::OutOfMemory);
        }

        let aligned = ((raw as u64) + boundary as u64 - 1) & !(boundary as u64 - 1);

        unsafe {
            core::ptr::write_bytes(aligned as *mut u8, 0, size);
        }
        let first_page = aligned & !(PAGE_SIZE as u64 - 1);
        let last_page = (aligned + size as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        let mut page = first_page;
        while page <= last_page {
            mark_page_uncacheable(page);
            page += PAGE_SIZE as u64;
        }

        Ok(Self {
            raw,
            layout,
            aligned,
            size,
        })
    }

    /// Physical address of the buffer, for device programming.
    pub fn phys_addr(&self) -> u64 {
        super::virt_to_phys(self.aligned)
    }

    /// Virtual address of the buffer, for kernel access.
    pub fn virt_addr(&self) -> u64 {
        self.aligned
    }

    /// Usable length in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// View the buffer as a mutable byte slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.aligned as *mut u8, self.size) }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.raw, self.layout);
        }
    }
}
