//! Panic and fatal-halt handling.
//!
//! Fatal conditions funnel through `halt_with_message`, which drains the
//! kernel log ring to the serial sink before parking the CPU, so the tail of
//! the log survives even when the regular mirroring never ran.

use core::panic::PanicInfo;

use crate::log_error;

/// Drain the log ring to the byte sinks. Best-effort; safe to call from any
/// context because neither side allocates.
fn drain_log_ring() {
    let ring = match crate::logging::log_ring() {
        Some(ring) => ring,
        None => return,
    };
    let mut chunk = [0u8; 256];
    loop {
        let count = ring.read(&mut chunk);
        if count == 0 {
            break;
        }
        crate::logging::output::write_bytes(&chunk[..count]);
    }
}

/// Log a fatal diagnostic, flush the log ring, and halt this CPU forever.
pub fn halt_with_message(message: &str) -> ! {
    log_error!("FATAL: {}", message);
    drain_log_ring();
    halt_forever();
}

fn halt_forever() -> ! {
    loop {
        x86_64::instructions::interrupts::disable();
        x86_64::instructions::hlt();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if let Some(location) = info.location() {
        log_error!(
            "kernel panic at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        log_error!("kernel panic: {}", info.message());
    }
    drain_log_ring();
    halt_forever();
}
