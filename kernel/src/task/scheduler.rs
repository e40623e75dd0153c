//! Round-robin scheduler over a fixed-capacity run queue.
//!
//! Insertion scans for the first `Invalid` slot; selection walks the queue in
//! strict index order modulo capacity from a per-CPU cursor, skipping
//! anything not `Ready`. With zero or one runnable tasks a tick is a no-op.
//! At most one PCB per CPU is ever `Running`, and the per-CPU current-task
//! value is an index into the queue (or the swapper sentinel), never a
//! pointer.

use spin::Mutex;

use super::{Pcb, Pid, ProcessState};
use crate::config::{MAX_CPUS, MAX_QUEUED_TASKS};
use crate::interrupts::TrapFrame;
use crate::percpu;

pub struct RoundRobinScheduler {
    run_queue: [Pcb; MAX_QUEUED_TASKS],
    /// Per-CPU rotating cursor; `usize::MAX` means the CPU is running its
    /// swapper task rather than a queue slot.
    current: [usize; MAX_CPUS],
    tasks_in_queue: usize,
}

impl RoundRobinScheduler {
    pub const fn new() -> Self {
        Self {
            run_queue: [Pcb::empty(); MAX_QUEUED_TASKS],
            current: [usize::MAX; MAX_CPUS],
            tasks_in_queue: 0,
        }
    }

    /// Insert a task into the first `Invalid` slot. Returns the slot index.
    pub fn add_task(&mut self, task: Pcb) -> Option<usize> {
        for index in 0..MAX_QUEUED_TASKS {
            if self.run_queue[index].state == ProcessState::Invalid {
                self.run_queue[index] = task;
                self.tasks_in_queue += 1;
                return Some(index);
            }
        }
        None
    }

    pub fn get_task(&mut self, index: usize) -> Option<&mut Pcb> {
        if index >= MAX_QUEUED_TASKS {
            return None;
        }
        Some(&mut self.run_queue[index])
    }

    pub fn find_task_by_pid(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.run_queue
            .iter_mut()
            .find(|pcb| pcb.state != ProcessState::Invalid && pcb.pid == pid)
    }

    /// Slot index of the task that would run next on `cpu`, without changing
    /// any state.
    pub fn peek_next_task(&self, cpu: usize) -> Option<usize> {
        if self.tasks_in_queue == 0 {
            return None;
        }
        let start = match self.current[cpu] {
            usize::MAX => MAX_QUEUED_TASKS - 1,
            index => index,
        };
        let mut index = start;
        loop {
            index = (index + 1) % MAX_QUEUED_TASKS;
            if self.run_queue[index].state == ProcessState::Ready {
                return Some(index);
            }
            if index == start {
                return None;
            }
        }
    }

    /// Advance `cpu`'s cursor to the next `Ready` task. The outgoing task
    /// (if it was `Running`) becomes `Ready`, the incoming one `Running`.
    /// Returns false when there is nothing to switch to.
    pub fn switch_to_next_task(&mut self, cpu: usize) -> bool {
        if self.tasks_in_queue < 2 && self.current[cpu] != usize::MAX {
            return false;
        }
        let next = match self.peek_next_task(cpu) {
            Some(index) => index,
            None => return false,
        };
        let previous = self.current[cpu];
        if previous == next {
            return false;
        }
        if previous != usize::MAX && self.run_queue[previous].state == ProcessState::Running {
            self.run_queue[previous].state = ProcessState::Ready;
        }
        self.run_queue[next].state = ProcessState::Running;
        self.run_queue[next].cpu = cpu;
        self.current[cpu] = next;
        percpu::set_current_task_index(cpu, next);
        true
    }

    /// Remove the task with `pid`, freeing its slot. Unknown pid is a no-op.
    pub fn remove_task(&mut self, pid: Pid) {
        for index in 0..MAX_QUEUED_TASKS {
            let pcb = &mut self.run_queue[index];
            if pcb.state != ProcessState::Invalid && pcb.pid == pid {
                *pcb = Pcb::empty();
                self.tasks_in_queue -= 1;
                for cursor in self.current.iter_mut() {
                    if *cursor == index {
                        *cursor = usize::MAX;
                    }
                }
                return;
            }
        }
    }

    /// The PCB currently running on `cpu`, unless the CPU is on its swapper.
    pub fn current_task(&mut self, cpu: usize) -> Option<&mut Pcb> {
        match self.current[cpu] {
            usize::MAX => None,
            index => Some(&mut self.run_queue[index]),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks_in_queue
    }

    /// Preemption entry, called from the timer interrupt with the saved trap
    /// frame. Saves the outgoing context into its PCB, switches, and loads
    /// the incoming context into the frame so the IRETQ path resumes the new
    /// task. Returns whether a switch happened.
    pub fn preempt(&mut self, cpu: usize, frame: &mut TrapFrame) -> bool {
        let previous = self.current[cpu];
        if !self.switch_to_next_task(cpu) {
            return false;
        }

        let outgoing = frame.capture_context();
        match previous {
            usize::MAX => super::save_swapper_context(cpu, outgoing),
            index => {
                if self.run_queue[index].state != ProcessState::Invalid {
                    self.run_queue[index].context = outgoing;
                }
            }
        }

        let incoming = self.run_queue[self.current[cpu]].context;
        frame.apply_context(&incoming);
        true
    }
}

static SCHEDULER: Mutex<RoundRobinScheduler> = Mutex::new(RoundRobinScheduler::new());

/// The global scheduler. Never hold this lock across a heap call.
pub fn scheduler() -> &'static Mutex<RoundRobinScheduler> {
    &SCHEDULER
}
