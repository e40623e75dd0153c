//! Unified logging subsystem.
//!
//! Log lines are formatted into fixed stack buffers (no heap, safe in panic
//! and interrupt paths), filtered by a global level, then fanned out to the
//! kernel log ring, COM1, and the QEMU debug port. `dmesg_read` drains the
//! ring into a caller buffer.

pub mod output;
pub mod ring;

#[macro_use]
pub mod macros;

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use ring::CircularBuffer;
use spin::Once;

/// Log levels, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN ",
            LogLevel::Info => "INFO ",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime level filter; messages above this level are dropped.
static MAX_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

static LOG_RING: Once<CircularBuffer> = Once::new();

static mut LOG_RING_STORAGE: [u8; crate::config::LOG_RING_CAPACITY] =
    [0; crate::config::LOG_RING_CAPACITY];

/// Initialize the logging subsystem. Idempotent.
pub fn init() {
    LOG_RING.call_once(|| {
        // The storage static is handed out exactly once, here.
        #[allow(static_mut_refs)]
        let storage = unsafe { &mut LOG_RING_STORAGE };
        CircularBuffer::new(storage)
    });
    MAX_LEVEL.store(crate::config::DEFAULT_LOG_LEVEL as u8, Ordering::Relaxed);
}

/// Change the runtime level filter.
pub fn set_max_level(level: LogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

fn should_log(level: LogLevel) -> bool {
    (level as u8) <= MAX_LEVEL.load(Ordering::Relaxed)
}

/// Access the kernel log ring, if initialized.
pub fn log_ring() -> Option<&'static CircularBuffer> {
    LOG_RING.get()
}

/// Drain buffered log bytes into `buf`, NUL-terminating within the provided
/// length. Returns the number of payload bytes copied (not counting the NUL).
pub fn dmesg_read(buf: &mut [u8]) -> usize {
    if buf.is_empty() {
        return 0;
    }
    let ring = match LOG_RING.get() {
        Some(ring) => ring,
        None => {
            buf[0] = 0;
            return 0;
        }
    };
    let limit = buf.len() - 1;
    let count = ring.read(&mut buf[..limit]);
    buf[count] = 0;
    count
}

/// Log a message (internal; used by the macros).
///
/// Formats into a stack buffer and hands the bytes to the output fan-out and
/// the log ring. Allocation-free.
#[doc(hidden)]
pub fn log_impl(level: LogLevel, module: &str, message: &str) {
    if !should_log(level) {
        return;
    }

    let mut buf = [0u8; 512];
    let len = format_log_entry(&mut buf, level, module, message);

    if let Some(ring) = LOG_RING.get() {
        ring.write(&buf[..len]);
    }
    output::write_bytes(&buf[..len]);
}

/// Format `[LEVEL module] message\n` into `buf`, returning the length.
fn format_log_entry(buf: &mut [u8], level: LogLevel, module: &str, message: &str) -> usize {
    let mut pos = 0;

    let mut push = |buf: &mut [u8], pos: &mut usize, byte: u8| {
        if *pos < buf.len() - 1 {
            buf[*pos] = byte;
            *pos += 1;
        }
    };

    push(buf, &mut pos, b'[');
    for byte in level.as_str().bytes() {
        push(buf, &mut pos, byte);
    }
    push(buf, &mut pos, b' ');

    // Strip the crate-name prefix so lines stay short:
    // "nimbus_kernel::memory::heap" -> "memory::heap"
    let module_short = match module.find("::") {
        Some(idx) => &module[idx + 2..],
        None => "kernel",
    };
    for byte in module_short.bytes().take(64) {
        push(buf, &mut pos, byte);
    }

    push(buf, &mut pos, b']');
    push(buf, &mut pos, b' ');

    for byte in message.bytes() {
        push(buf, &mut pos, byte);
    }
    push(buf, &mut pos, b'\n');

    pos
}

/// Stack-based formatter target used by the logging macros.
pub struct StackWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> StackWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.pos]).unwrap_or("<invalid utf-8>")
    }
}

impl core::fmt::Write for StackWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len() - self.pos;
        let to_write = bytes.len().min(remaining);
        self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
        self.pos += to_write;
        Ok(())
    }
}
