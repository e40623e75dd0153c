//! Log output fan-out.
//!
//! Formatted log bytes are mirrored to COM1 (if the serial driver is up) and
//! to the QEMU debug port. The log ring is written by `logging::log_impl`
//! directly; this module only covers the byte sinks.

use core::sync::atomic::{AtomicBool, Ordering};

/// Whether the serial driver has been initialized and may be written to.
static SERIAL_READY: AtomicBool = AtomicBool::new(false);

/// Mark the serial sink usable. Called once by the serial driver.
pub fn set_serial_ready() {
    SERIAL_READY.store(true, Ordering::Release);
}

/// Write bytes to every active sink.
pub fn write_bytes(bytes: &[u8]) {
    nimbus_shared::qemu::out_bytes(bytes);
    if SERIAL_READY.load(Ordering::Acquire) {
        crate::drivers::serial::write_bytes(bytes);
    }
}
