//! Local APIC driver.
//!
//! Enables the LAPIC through IA32_APIC_BASE, maps its 4 KiB MMIO frame, and
//! exposes register access, EOI, and IPI send. The frame is mapped as a
//! USERSPACE page deliberately: under the elevation model most kernel code
//! runs at ring 3 and still has to reach EOI and the ICR.
//!
//! Register access is 32-bit volatile, never narrower; the LAPIC ignores or
//! corrupts sub-dword accesses.

use core::sync::atomic::{AtomicU64, Ordering};

use raw_cpuid::CpuId;
use x86_64::registers::model_specific::Msr;

use crate::log_debug;
use crate::memory::{self, CACHE_DISABLED, USERSPACE_PAGE};

const IA32_APIC_BASE_MSR: u32 = 0x1B;
const APIC_GLOBAL_ENABLE: u64 = 1 << 11;

/// Register offsets (bytes from the MMIO base).
pub const APIC_REG_ID: u32 = 0x20;
pub const APIC_REG_VERSION: u32 = 0x30;
pub const APIC_REG_TPR: u32 = 0x80;
pub const APIC_REG_EOI: u32 = 0xB0;
pub const APIC_REG_SPURIOUS: u32 = 0xF0;
pub const APIC_REG_ESR: u32 = 0x280;
pub const APIC_REG_ICR_LOW: u32 = 0x300;
pub const APIC_REG_ICR_HIGH: u32 = 0x310;
pub const APIC_REG_LVT_TIMER: u32 = 0x320;
pub const APIC_REG_LVT_LINT0: u32 = 0x350;
pub const APIC_REG_LVT_LINT1: u32 = 0x360;
pub const APIC_REG_LVT_ERROR: u32 = 0x370;
pub const APIC_REG_TIMER_INITIAL: u32 = 0x380;
pub const APIC_REG_TIMER_CURRENT: u32 = 0x390;
pub const APIC_REG_TIMER_DIVIDE: u32 = 0x3E0;

const ICR_LEVEL_ASSERT: u32 = 1 << 14;
const SPURIOUS_APIC_ENABLE: u32 = 1 << 8;
const SPURIOUS_VECTOR: u32 = 0xFF;

/// Virtual base of the mapped LAPIC window (identity: equals the physical
/// base). Zero until `initialize` has run.
static LAPIC_BASE: AtomicU64 = AtomicU64::new(0);

/// True when CPUID advertises an on-chip APIC.
pub fn has_apic() -> bool {
    CpuId::new()
        .get_feature_info()
        .map(|f| f.has_apic())
        .unwrap_or(false)
}

/// Enable the local APIC and map its MMIO frame.
///
/// Reads IA32_APIC_BASE, sets the global-enable bit, maps the 4 KiB register
/// frame user-accessible and uncacheable, flushes the TLB, then programs the
/// spurious-interrupt vector register with the enable bit and vector 0xFF.
///
/// # Safety
/// Must run once on the boot path after paging and the frame allocator are
/// live.
pub unsafe fn initialize() {
    if LAPIC_BASE.load(Ordering::Acquire) != 0 {
        return;
    }

    let mut msr = Msr::new(IA32_APIC_BASE_MSR);
    let mut apic_base = msr.read();
    apic_base |= APIC_GLOBAL_ENABLE;
    msr.write(apic_base);

    let phys_base = apic_base & !0xFFFu64;

    {
        let root = memory::current_top_level_table();
        let mut pfa = memory::frame_allocator().lock();
        memory::map_page(
            root,
            phys_base,
            phys_base,
            USERSPACE_PAGE | CACHE_DISABLED,
            &mut *pfa,
        );
    }
    memory::flush_tlb_all();

    LAPIC_BASE.store(phys_base, Ordering::Release);

    let spurious = read_register(APIC_REG_SPURIOUS) | SPURIOUS_APIC_ENABLE | SPURIOUS_VECTOR;
    write_register(APIC_REG_SPURIOUS, spurious);

    log_debug!("LAPIC enabled at {:#x}, spurious vector {:#x}", phys_base, SPURIOUS_VECTOR);
}

fn base() -> u64 {
    let base = LAPIC_BASE.load(Ordering::Acquire);
    if base == 0 {
        crate::panic::halt_with_message("LAPIC register access before initialization");
    }
    base
}

/// Read a LAPIC register. 32-bit volatile.
pub fn read_register(offset: u32) -> u32 {
    let addr = base() + offset as u64;
    unsafe { core::ptr::read_volatile(addr as *const u32) }
}

/// Write a LAPIC register. 32-bit volatile.
pub fn write_register(offset: u32, value: u32) {
    let addr = base() + offset as u64;
    unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
}

/// Signal end-of-interrupt. Must be the last action of every IRQ handler
/// before IRETQ.
#[inline]
pub fn end_of_interrupt() {
    write_register(APIC_REG_EOI, 0);
}

/// Send an inter-processor interrupt to `apic_id` with the given vector.
pub fn send_ipi(apic_id: u8, vector: u32) {
    write_register(APIC_REG_ICR_HIGH, (apic_id as u32) << 24);
    write_register(APIC_REG_ICR_LOW, vector | ICR_LEVEL_ASSERT);
}

/// Physical/virtual base of the mapped LAPIC window (0 if uninitialized).
pub fn mmio_base() -> u64 {
    LAPIC_BASE.load(Ordering::Acquire)
}
