//! Per-CPU region.
//!
//! Each logical CPU owns a slot holding its current-task index (into the
//! scheduler run queue, or the swapper sentinel) and its elevation flag. The
//! current task is always an index, never an owning pointer, so the scheduler
//! can recycle slots without dangling references.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::{BSP_CPU_ID, MAX_CPUS};

/// Sentinel current-task value naming the per-CPU swapper task rather than a
/// run-queue slot.
pub const SWAPPER_TASK: usize = usize::MAX;

struct PerCpu {
    current_task: AtomicUsize,
    elevated: AtomicBool,
}

impl PerCpu {
    const fn new() -> Self {
        Self {
            current_task: AtomicUsize::new(SWAPPER_TASK),
            elevated: AtomicBool::new(false),
        }
    }
}

static PER_CPU: [PerCpu; MAX_CPUS] = {
    const SLOT: PerCpu = PerCpu::new();
    [SLOT; MAX_CPUS]
};

/// Id of the CPU executing this code. Single-socket bring-up runs everything
/// on the BSP; secondary CPUs will derive this from their LAPIC id.
#[inline]
pub fn current_cpu_id() -> usize {
    BSP_CPU_ID
}

/// Run-queue index of the task running on `cpu`, or `SWAPPER_TASK`.
pub fn current_task_index(cpu: usize) -> usize {
    PER_CPU[cpu].current_task.load(Ordering::Acquire)
}

pub fn set_current_task_index(cpu: usize, index: usize) {
    PER_CPU[cpu].current_task.store(index, Ordering::Release);
}

/// Whether the current task on `cpu` holds elevated (ring 0) privileges.
pub fn is_elevated(cpu: usize) -> bool {
    PER_CPU[cpu].elevated.load(Ordering::Acquire)
}

pub fn set_elevated(cpu: usize, elevated: bool) {
    PER_CPU[cpu].elevated.store(elevated, Ordering::Release);
}
