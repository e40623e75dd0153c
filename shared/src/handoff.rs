//! Boot parameter block passed from the pre-kernel loader to the kernel.
//!
//! Layout is stable (`repr(C)`) so the loader side can fill it in without
//! sharing Rust type layout assumptions. The kernel copies this block into
//! its own storage immediately on entry; the loader's copy is dead after
//! that point.

/// Maximum number of loadable kernel ELF segments described in the block.
pub const MAX_KERNEL_SEGMENTS: usize = 16;

/// One loadable ELF segment of the kernel image.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct KernelSegment {
    /// Physical base address the segment was loaded at
    pub physical_base: u64,
    /// Virtual base address the segment links against
    pub virtual_base: u64,
    /// Segment size in bytes
    pub size: u64,
}

impl KernelSegment {
    pub const fn empty() -> Self {
        Self {
            physical_base: 0,
            virtual_base: 0,
            size: 0,
        }
    }
}

/// Linear framebuffer description handed over by the loader.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FramebufferInfo {
    /// Framebuffer base address
    pub base: u64,
    /// Framebuffer size in bytes
    pub size: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pitch in bytes per scanline
    pub pitch: u32,
    /// Bits per pixel
    pub bpp: u32,
}

/// Firmware memory map as raw descriptor storage.
///
/// Descriptors are read field-by-field (type @ 0, physical start @ 8,
/// page count @ 24) so the kernel does not depend on firmware-side struct
/// definitions.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MemoryMapInfo {
    /// Physical address of the descriptor array
    pub base: u64,
    /// Size of one descriptor in bytes
    pub descriptor_size: u64,
    /// Number of descriptors
    pub descriptor_count: u64,
}

/// The boot parameter block.
///
/// The loader fills every field before jumping to the kernel entry point
/// with the block's physical address in the first argument register.
#[repr(C)]
pub struct BootInfo {
    /// Total size of this struct in bytes (layout check)
    pub size: u32,
    /// Handoff format version, non-zero
    pub version: u32,

    /// Base of the kernel stack the loader allocated (one page)
    pub kernel_stack_base: u64,

    /// Loaded kernel ELF segments
    pub kernel_segments: [KernelSegment; MAX_KERNEL_SEGMENTS],
    /// Number of valid entries in `kernel_segments`
    pub kernel_segment_count: u32,
    pub _reserved0: u32,

    /// Firmware memory map
    pub memory_map: MemoryMapInfo,

    /// Boot framebuffer
    pub framebuffer: FramebufferInfo,

    /// Pointer to the PSF font used by the boot text renderer
    pub font_ptr: u64,

    /// Pointer to the ACPI RSDP
    pub rsdp: u64,
}

impl BootInfo {
    pub const fn empty() -> Self {
        Self {
            size: 0,
            version: 0,
            kernel_stack_base: 0,
            kernel_segments: [KernelSegment::empty(); MAX_KERNEL_SEGMENTS],
            kernel_segment_count: 0,
            _reserved0: 0,
            memory_map: MemoryMapInfo {
                base: 0,
                descriptor_size: 0,
                descriptor_count: 0,
            },
            framebuffer: FramebufferInfo {
                base: 0,
                size: 0,
                width: 0,
                height: 0,
                pitch: 0,
                bpp: 0,
            },
            font_ptr: 0,
            rsdp: 0,
        }
    }
}
