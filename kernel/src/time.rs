//! Tick-based time keeping.
//!
//! The LAPIC periodic timer increments a global tick counter at the nominal
//! `config::TIMER_HZ` rate. `sleep_ms` busy-waits on that counter; when the
//! timer is not running yet (or interrupts are masked) it falls back to a
//! port-0x80 I/O delay loop so boot-time driver timeouts still elapse.

use x86_64::instructions::port::Port;

use crate::config::TIMER_HZ;
use crate::interrupts::timer_tick_count;

/// Spins for roughly one microsecond using the traditional POST-port write.
#[inline]
fn io_delay_us() {
    unsafe {
        let mut port: Port<u8> = Port::new(0x80);
        port.write(0u8);
    }
}

fn ticks_for_ms(ms: u64) -> u64 {
    (ms * TIMER_HZ + 999) / 1000
}

/// Sleep for at least `ms` milliseconds.
///
/// Cooperative: the caller keeps the CPU (hlt between polls) and there is no
/// cancellation; callers needing bounded waits pass small `ms` values and
/// loop.
pub fn sleep_ms(ms: u64) {
    if ms == 0 {
        return;
    }
    let start = timer_tick_count();
    let target_ticks = ticks_for_ms(ms);

    // Give the tick counter a short window to prove it is advancing.
    let mut probe = 0u32;
    while timer_tick_count() == start && probe < 50_000 {
        core::hint::spin_loop();
        probe += 1;
    }

    if timer_tick_count() != start {
        while timer_tick_count().wrapping_sub(start) < target_ticks as u32 {
            x86_64::instructions::hlt();
        }
    } else {
        // Timer not ticking (early boot or IF masked): ~1000 port reads/ms.
        for _ in 0..ms {
            for _ in 0..1000 {
                io_delay_us();
            }
        }
    }
}
