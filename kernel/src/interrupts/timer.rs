//! LAPIC timer control.
//!
//! The periodic timer drives the scheduler tick. Configuration leaves the
//! timer masked; `start_periodic` arms it with the configured initial count
//! and the /16 divider.

use core::sync::atomic::Ordering;

use super::apic::{
    read_register, write_register, APIC_REG_ESR, APIC_REG_LVT_ERROR, APIC_REG_LVT_LINT0,
    APIC_REG_LVT_LINT1, APIC_REG_LVT_TIMER, APIC_REG_TIMER_INITIAL, APIC_REG_TIMER_DIVIDE,
    APIC_REG_TPR,
};
use super::{APIC_ERROR_VECTOR, APIC_TIMER_VECTOR, TIMER_TICKS};
use crate::log_debug;

const LVT_MASKED: u32 = 1 << 16;
const LVT_PERIODIC: u32 = 1 << 17;
const DIVIDE_BY_16: u32 = 0x3;

/// Configure the LAPIC timer (masked) and quiet the legacy LINT pins.
///
/// # Safety
/// Requires the LAPIC to be initialized and its MMIO window mapped.
pub unsafe fn lapic_timer_configure() {
    // Allow all interrupt priorities.
    write_register(APIC_REG_TPR, 0);

    write_register(APIC_REG_TIMER_DIVIDE, DIVIDE_BY_16);
    write_register(APIC_REG_LVT_TIMER, APIC_TIMER_VECTOR as u32 | LVT_MASKED);

    write_register(
        APIC_REG_LVT_LINT0,
        read_register(APIC_REG_LVT_LINT0) | LVT_MASKED,
    );
    write_register(
        APIC_REG_LVT_LINT1,
        read_register(APIC_REG_LVT_LINT1) | LVT_MASKED,
    );

    write_register(
        APIC_REG_LVT_ERROR,
        (read_register(APIC_REG_LVT_ERROR) & !0xFF) | APIC_ERROR_VECTOR as u32,
    );
    // Clear ESR by writing then reading.
    write_register(APIC_REG_ESR, 0);
    let _ = read_register(APIC_REG_ESR);

    log_debug!("LAPIC timer configured (masked, /16)");
}

/// Start the timer in periodic mode with `initial_count`.
///
/// # Safety
/// `lapic_timer_configure` must have run on this CPU.
pub unsafe fn lapic_timer_start_periodic(initial_count: u32) {
    let mut lvt = read_register(APIC_REG_LVT_TIMER);
    lvt |= LVT_PERIODIC;
    lvt &= !LVT_MASKED;
    write_register(APIC_REG_LVT_TIMER, lvt);
    write_register(APIC_REG_TIMER_INITIAL, initial_count);
}

/// Mask the timer.
pub unsafe fn lapic_timer_mask() {
    let lvt = read_register(APIC_REG_LVT_TIMER);
    write_register(APIC_REG_LVT_TIMER, lvt | LVT_MASKED);
}

/// Ticks since the periodic timer started.
pub fn timer_tick_count() -> u32 {
    TIMER_TICKS.load(Ordering::Relaxed)
}
