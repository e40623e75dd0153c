//! Task model: process control blocks, CPU contexts, and thread lifecycle.

pub mod scheduler;
pub mod switch;

pub use scheduler::{scheduler, RoundRobinScheduler};

use spin::Mutex;

use crate::config::{BSP_CPU_ID, MAX_CPUS};
use crate::gdt;
use crate::percpu;

pub type Pid = u64;

/// Task lifecycle states. A slot is `Invalid` until insertion; terminal
/// states free the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProcessState {
    Invalid = 0,
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// Saved CPU state of a task. Field order is fixed: the context-switch
/// assembly in `switch.rs` addresses these by byte offset.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CpuContext {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
    pub cs: u64,
    pub ss: u64,
    pub cr3: u64,
}

impl CpuContext {
    pub const fn zeroed() -> Self {
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rsp: 0,
            rflags: 0,
            cs: 0,
            ss: 0,
            cr3: 0,
        }
    }

    /// Context for a fresh ring-3 kernel thread: interrupts enabled, user
    /// segments, current address space.
    pub fn for_kernel_thread(entry: u64, stack_top: u64) -> Self {
        let mut ctx = Self::zeroed();
        ctx.rip = entry;
        ctx.rsp = stack_top;
        ctx.rflags = 0x202;
        ctx.cs = gdt::USER_CS as u64;
        ctx.ss = gdt::USER_DS as u64;
        ctx.cr3 = {
            use x86_64::registers::control::Cr3;
            let (frame, _) = Cr3::read();
            frame.start_address().as_u64()
        };
        ctx
    }
}

/// Process control block.
#[derive(Debug, Clone, Copy)]
pub struct Pcb {
    pub pid: Pid,
    pub state: ProcessState,
    pub cpu: usize,
    pub elevated: bool,
    pub context: CpuContext,
}

impl Pcb {
    pub const fn empty() -> Self {
        Self {
            pid: 0,
            state: ProcessState::Invalid,
            cpu: 0,
            elevated: false,
            context: CpuContext::zeroed(),
        }
    }
}

/// Per-CPU swapper tasks: the threads of last resort each CPU falls back to
/// when its run queue drains.
static SWAPPER_TASKS: Mutex<[Pcb; MAX_CPUS]> = Mutex::new([Pcb::empty(); MAX_CPUS]);

/// Initialize the BSP swapper task to describe the currently running boot
/// thread (pid 1, RUNNING, interrupts enabled in its saved RFLAGS).
pub fn init_bootstrap_task() {
    let mut swappers = SWAPPER_TASKS.lock();
    let swapper = &mut swappers[BSP_CPU_ID];
    swapper.pid = 1;
    swapper.state = ProcessState::Running;
    swapper.cpu = BSP_CPU_ID;
    swapper.elevated = false;
    swapper.context = CpuContext::zeroed();
    swapper.context.rflags |= 0x200;
    percpu::set_current_task_index(BSP_CPU_ID, percpu::SWAPPER_TASK);
}

/// Snapshot of the swapper PCB for `cpu`.
pub fn swapper_task(cpu: usize) -> Pcb {
    SWAPPER_TASKS.lock()[cpu]
}

/// Store an updated swapper context (used when the boot thread is preempted).
pub fn save_swapper_context(cpu: usize, context: CpuContext) {
    let mut swappers = SWAPPER_TASKS.lock();
    swappers[cpu].context = context;
    swappers[cpu].state = ProcessState::Ready;
}

pub fn set_swapper_running(cpu: usize) {
    SWAPPER_TASKS.lock()[cpu].state = ProcessState::Running;
}

/// Create a ring-3 kernel thread and place it on the run queue.
/// Returns the assigned slot index, or None when the queue is full.
pub fn spawn_kernel_thread(pid: Pid, entry: extern "C" fn() -> !, stack_top: u64) -> Option<usize> {
    let mut pcb = Pcb::empty();
    pcb.pid = pid;
    pcb.state = ProcessState::Ready;
    pcb.cpu = percpu::current_cpu_id();
    pcb.context = CpuContext::for_kernel_thread(entry as usize as u64, stack_top);
    scheduler().lock().add_task(pcb)
}

/// Voluntary exit of the current kernel thread.
///
/// Elevates, masks interrupts, picks the next READY task (or this CPU's
/// swapper), removes the exiting task's slot, and performs a one-way context
/// restore. Interrupts come back on in the restored context through its saved
/// RFLAGS.
pub fn exit_kernel_thread() -> ! {
    crate::syscall::elevate();
    x86_64::instructions::interrupts::disable();

    let cpu = percpu::current_cpu_id();
    let next_context = {
        let mut sched = scheduler().lock();
        let current_pid = sched.current_task(cpu).map(|pcb| pcb.pid);

        let next = match sched.peek_next_task(cpu) {
            Some(index) => {
                sched.switch_to_next_task(cpu);
                *sched
                    .get_task(index)
                    .expect("peeked slot disappeared under the scheduler lock")
            }
            None => {
                let swapper = swapper_task(cpu);
                // The swapper context is only restorable once the timer has
                // preempted the boot thread at least once and saved it.
                if swapper.context.rip == 0 {
                    crate::panic::halt_with_message("no runnable task to exit into");
                }
                percpu::set_current_task_index(cpu, percpu::SWAPPER_TASK);
                set_swapper_running(cpu);
                swapper
            }
        };

        if let Some(pid) = current_pid {
            sched.remove_task(pid);
        }
        next.context
    };

    unsafe { switch::restore_context(&next_context) }
}
