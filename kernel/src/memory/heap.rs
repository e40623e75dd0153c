//! Kernel heap: first-fit allocator over a doubly linked segment list.
//!
//! Every segment starts with a header carrying a magic signature, the total
//! segment size (header included), a free flag, and prev/next links. A
//! candidate segment is split only when the remainder after carving the
//! request plus a header still holds at least `2 * MIN_SEGMENT_CAPACITY`
//! bytes; otherwise the whole segment is handed out. Freeing merges with the
//! next segment first, then with the previous one (the order keeps the
//! base-relative arithmetic valid). A free with a bad magic is logged and
//! ignored, never applied.
//!
//! The caller-provided base is authoritative: `init` lays the initial
//! segment over exactly the region it is given.

use core::alloc::{GlobalAlloc, Layout};

use spin::Mutex;

use crate::{log_error, log_warn};

/// Signature checked before any segment is trusted.
const SEGMENT_MAGIC: u64 = 0x4E49_4D42_4845_4150;

/// Smallest usable capacity a split may leave behind.
const MIN_SEGMENT_CAPACITY: usize = 8;

const HEADER_SIZE: usize = core::mem::size_of::<HeapSegmentHeader>();

#[repr(C)]
struct HeapSegmentHeader {
    magic: u64,
    /// Total segment size in bytes, header included.
    size: usize,
    /// Non-zero when the segment is free.
    free: u64,
    prev: *mut HeapSegmentHeader,
    next: *mut HeapSegmentHeader,
}

/// First-fit heap over a caller-provided region.
pub struct KernelHeap {
    first_segment: *mut HeapSegmentHeader,
    heap_size: usize,
}

// Reached only through the global spinlock (or exclusively in tests).
unsafe impl Send for KernelHeap {}

impl KernelHeap {
    pub const fn empty() -> Self {
        Self {
            first_segment: core::ptr::null_mut(),
            heap_size: 0,
        }
    }

    /// Lay a single free segment over `[base, base + size)`.
    ///
    /// # Safety
    /// The region must be writable, unused, and at least a header plus
    /// `MIN_SEGMENT_CAPACITY` bytes large.
    pub unsafe fn init(&mut self, base: u64, size: usize) {
        let segment = base as *mut HeapSegmentHeader;
        (*segment).magic = SEGMENT_MAGIC;
        (*segment).size = size;
        (*segment).free = 1;
        (*segment).prev = core::ptr::null_mut();
        (*segment).next = core::ptr::null_mut();
        self.first_segment = segment;
        self.heap_size = size;
    }

    pub fn is_initialized(&self) -> bool {
        !self.first_segment.is_null()
    }

    /// Allocate `size` bytes. Returns null on exhaustion.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        let needed = size + HEADER_SIZE;
        let segment = self.find_free_segment(needed);
        if segment.is_null() {
            return core::ptr::null_mut();
        }
        unsafe {
            // Split when the tail would still be a viable segment; otherwise
            // hand out the whole thing.
            self.split_segment(segment, needed);
            (*segment).free = 0;
            (segment as *mut u8).add(HEADER_SIZE)
        }
    }

    /// Free a pointer previously returned by `allocate`. Invalid pointers are
    /// reported and ignored; a segment is never freed twice.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            log_warn!("heap: free(null) ignored");
            return;
        }
        let segment = unsafe { ptr.sub(HEADER_SIZE) } as *mut HeapSegmentHeader;
        unsafe {
            if (*segment).magic != SEGMENT_MAGIC {
                log_error!("heap: invalid pointer {:#x} passed to free", ptr as u64);
                return;
            }
            if (*segment).free != 0 {
                log_error!("heap: double free of {:#x} ignored", ptr as u64);
                return;
            }
            (*segment).free = 1;

            // Merging with the next segment has to come first to preserve
            // the base-relative size arithmetic.
            let next = (*segment).next;
            if !next.is_null() && (*next).free != 0 {
                self.merge_with_next(segment);
            }
            let prev = (*segment).prev;
            if !prev.is_null() && (*prev).free != 0 {
                self.merge_with_next(prev);
            }
        }
    }

    fn find_free_segment(&self, min_size: usize) -> *mut HeapSegmentHeader {
        let mut segment = self.first_segment;
        while !segment.is_null() {
            unsafe {
                if (*segment).free != 0 && (*segment).size >= min_size {
                    return segment;
                }
                segment = (*segment).next;
            }
        }
        core::ptr::null_mut()
    }

    /// Carve `size` bytes off the front of `segment` when the remainder can
    /// stand on its own. Returns whether a split happened.
    unsafe fn split_segment(&mut self, segment: *mut HeapSegmentHeader, size: usize) -> bool {
        let remainder = (*segment).size as isize - (size + HEADER_SIZE) as isize;
        if remainder < (MIN_SEGMENT_CAPACITY * 2) as isize {
            return false;
        }

        let new_segment = (segment as *mut u8).add(size) as *mut HeapSegmentHeader;
        (*new_segment).magic = SEGMENT_MAGIC;
        (*new_segment).free = (*segment).free;
        (*new_segment).size = (*segment).size - size;
        (*new_segment).next = (*segment).next;
        (*new_segment).prev = segment;
        if !(*new_segment).next.is_null() {
            (*(*new_segment).next).prev = new_segment;
        }

        (*segment).size = size;
        (*segment).next = new_segment;
        true
    }

    /// Absorb the segment after `segment`; the next segment ceases to exist.
    unsafe fn merge_with_next(&mut self, segment: *mut HeapSegmentHeader) {
        let next = (*segment).next;
        if next.is_null() {
            return;
        }
        (*segment).size += (*next).size;
        (*segment).next = (*next).next;
        if !(*segment).next.is_null() {
            (*(*segment).next).prev = segment;
        }
    }

    /// Number of segments currently on the list.
    pub fn segment_count(&self) -> usize {
        let mut count = 0;
        let mut segment = self.first_segment;
        while !segment.is_null() {
            count += 1;
            segment = unsafe { (*segment).next };
        }
        count
    }

    /// Copy the (size, free) shape of the segment list into `out`; returns
    /// the number of entries written. Used by the heap invariant tests.
    pub fn shape(&self, out: &mut [(usize, bool)]) -> usize {
        let mut count = 0;
        let mut segment = self.first_segment;
        while !segment.is_null() && count < out.len() {
            unsafe {
                out[count] = ((*segment).size, (*segment).free != 0);
                segment = (*segment).next;
            }
            count += 1;
        }
        count
    }

    /// Total heap size handed to `init`.
    pub fn size(&self) -> usize {
        self.heap_size
    }
}

static KERNEL_HEAP: Mutex<KernelHeap> = Mutex::new(KernelHeap::empty());

/// The global kernel heap. Never hold this lock across a frame-allocator
/// bitmap scan.
pub fn kernel_heap() -> &'static Mutex<KernelHeap> {
    &KERNEL_HEAP
}

/// `GlobalAlloc` front end over the spinlocked kernel heap.
///
/// Alignments up to the header's natural 8-byte alignment come straight from
/// the segment allocator; larger alignments over-allocate and stash the raw
/// pointer just below the aligned block so `dealloc` can recover it.
pub struct LockedKernelHeap;

unsafe impl GlobalAlloc for LockedKernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut heap = KERNEL_HEAP.lock();
        if layout.align() <= 8 {
            return heap.allocate(layout.size().max(MIN_SEGMENT_CAPACITY));
        }
        let total = layout.size() + layout.align() + core::mem::size_of::<u64>();
        let raw = heap.allocate(total);
        if raw.is_null() {
            return raw;
        }
        let aligned =
            (raw as usize + core::mem::size_of::<u64>() + layout.align() - 1) & !(layout.align() - 1);
        ((aligned - core::mem::size_of::<u64>()) as *mut u64).write(raw as u64);
        aligned as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let mut heap = KERNEL_HEAP.lock();
        if layout.align() <= 8 {
            heap.free(ptr);
            return;
        }
        let raw = ((ptr as usize - core::mem::size_of::<u64>()) as *const u64).read();
        heap.free(raw as *mut u8);
    }
}

#[global_allocator]
static GLOBAL_ALLOCATOR: LockedKernelHeap = LockedKernelHeap;

/// Back the global heap with `pages` contiguous frames from the frame
/// allocator and initialize it. Fatal when the frames cannot be found.
pub fn init_kernel_heap(pages: usize) {
    let base = {
        let mut pfa = super::frame_allocator().lock();
        pfa.alloc_contiguous(pages)
    };
    let base = match base {
        Some(base) => base,
        None => crate::panic::halt_with_message("no contiguous region for the kernel heap"),
    };
    unsafe {
        KERNEL_HEAP.lock().init(base, pages * super::PAGE_SIZE);
    }
}
