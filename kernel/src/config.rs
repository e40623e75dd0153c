//! Centralized kernel configuration.
//!
//! Compile-time knobs live here so behavioral tweaks never require hunting
//! through subsystem code.

/// Minimum log level emitted at boot. Levels above this are dropped at the
/// filter before formatting. See `logging::LogLevel` for ordering.
pub const DEFAULT_LOG_LEVEL: crate::logging::LogLevel = crate::logging::LogLevel::Info;

/// Capacity of the kernel log ring in bytes. Oldest data is overwritten once
/// the ring fills.
pub const LOG_RING_CAPACITY: usize = 64 * 1024;

/// Number of 4 KiB pages backing the kernel heap.
pub const KERNEL_HEAP_PAGES: usize = 256;

/// Fixed capacity of the scheduler run queue.
pub const MAX_QUEUED_TASKS: usize = 64;

/// Number of logical CPUs the per-CPU region is sized for.
pub const MAX_CPUS: usize = 16;

/// The bootstrap processor's CPU id.
pub const BSP_CPU_ID: usize = 0;

/// LAPIC timer initial count for the periodic scheduler tick. With the /16
/// divider this lands near 1 kHz on QEMU's bus clock; `time::sleep_ms` only
/// assumes the nominal rate below.
pub const TIMER_INITIAL_COUNT: u32 = 62_500;

/// Nominal scheduler tick rate in Hz used for tick <-> millisecond math.
pub const TIMER_HZ: u64 = 1000;

/// Physical MMIO base of an xHCI controller to bring up at boot, taken from
/// PCI BAR0 by the platform. Zero means no controller is probed.
pub const XHCI_MMIO_BASE: u64 = 0;

/// Whether the kernel should idle (hlt loop) after initialization instead of
/// exiting QEMU. Integration tests override behavior by linking their own
/// entry point.
pub const KERNEL_SHOULD_IDLE: bool = true;
