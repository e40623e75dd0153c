//! Boot parameter block receiver.
//!
//! The loader passes a single `BootInfo` block by physical address. The
//! kernel copies it into its own storage immediately (the loader's memory is
//! reclaimed once the frame allocator comes up) and validates it before any
//! subsystem consumes a field.

use nimbus_shared::handoff::BootInfo;

static mut BOOT_INFO: BootInfo = BootInfo::empty();
static mut BOOT_INFO_VALID: bool = false;

/// Copy the loader's parameter block into kernel storage.
///
/// # Safety
/// `boot_info_addr` must point at a fully initialized `BootInfo`. Called once
/// on the boot path before any other CPU runs.
#[allow(static_mut_refs)]
pub unsafe fn receive_boot_info(boot_info_addr: u64) -> &'static BootInfo {
    let src = &*(boot_info_addr as *const BootInfo);
    BOOT_INFO = core::ptr::read(src as *const BootInfo);
    BOOT_INFO_VALID = true;
    &BOOT_INFO
}

/// The kernel's copy of the boot parameter block.
#[allow(static_mut_refs)]
pub fn boot_info() -> &'static BootInfo {
    unsafe {
        if !BOOT_INFO_VALID {
            crate::panic::halt_with_message("boot info accessed before handoff");
        }
        &BOOT_INFO
    }
}

/// Sanity-check the parameter block. Returns a description of the first
/// violated invariant.
pub fn validate_boot_info(info: &BootInfo) -> Result<(), &'static str> {
    if info.size != core::mem::size_of::<BootInfo>() as u32 {
        return Err("boot info size does not match BootInfo layout");
    }
    if info.version == 0 {
        return Err("boot info version must be non-zero");
    }
    if info.kernel_stack_base == 0 {
        return Err("kernel stack base must be non-zero");
    }
    if info.kernel_segment_count == 0 {
        return Err("at least one kernel ELF segment is required");
    }
    if info.kernel_segment_count as usize > nimbus_shared::handoff::MAX_KERNEL_SEGMENTS {
        return Err("kernel segment count exceeds table capacity");
    }
    for segment in &info.kernel_segments[..info.kernel_segment_count as usize] {
        if segment.physical_base == 0 || segment.size == 0 {
            return Err("kernel segment with null base or zero size");
        }
    }

    let map = &info.memory_map;
    if map.base == 0 || map.descriptor_size == 0 || map.descriptor_count == 0 {
        return Err("firmware memory map missing or empty");
    }

    let fb = &info.framebuffer;
    if fb.base != 0 {
        if fb.size == 0 || fb.width == 0 || fb.height == 0 {
            return Err("framebuffer present but geometry is zero");
        }
        if (fb.pitch as u64) < fb.width as u64 * (fb.bpp as u64 / 8) {
            return Err("framebuffer pitch smaller than a scanline");
        }
    }

    Ok(())
}
