//! Exception and interrupt handlers.
//!
//! Exceptions log through the allocation-free macros and halt (they are all
//! fatal at this stage). The timer vector is the preemption point: a naked
//! stub captures the full register frame, the dispatch routine hands it to
//! the scheduler, and the EOI is the last action before the IRETQ that
//! resumes whichever task the scheduler chose.

use core::sync::atomic::Ordering;

use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptStackFrame, PageFaultErrorCode};

use super::{apic, TrapFrame, TIMER_TICKS};
use crate::{log_error, log_warn};

pub(super) extern "x86-interrupt" fn handler_de(stack: InterruptStackFrame) {
    log_error!("divide error at {:#x}", stack.instruction_pointer.as_u64());
    crate::panic::halt_with_message("#DE");
}

pub(super) extern "x86-interrupt" fn handler_bp(stack: InterruptStackFrame) {
    log_warn!("breakpoint at {:#x}", stack.instruction_pointer.as_u64());
}

pub(super) extern "x86-interrupt" fn handler_ud(stack: InterruptStackFrame) {
    log_error!(
        "invalid opcode at {:#x} (cs={:#x})",
        stack.instruction_pointer.as_u64(),
        stack.code_segment.0
    );
    crate::panic::halt_with_message("#UD");
}

pub(super) extern "x86-interrupt" fn handler_gp(stack: InterruptStackFrame, code: u64) {
    log_error!(
        "general protection fault ec={:#x} rip={:#x} cs={:#x} rflags={:#x}",
        code,
        stack.instruction_pointer.as_u64(),
        stack.code_segment.0,
        stack.cpu_flags.bits()
    );
    crate::panic::halt_with_message("#GP");
}

pub(super) extern "x86-interrupt" fn handler_pf(
    stack: InterruptStackFrame,
    code: PageFaultErrorCode,
) {
    let cr2 = Cr2::read().map(|a| a.as_u64()).unwrap_or(0);
    log_error!(
        "page fault addr={:#x} ec={:?} rip={:#x}",
        cr2,
        code,
        stack.instruction_pointer.as_u64()
    );
    crate::panic::halt_with_message("#PF");
}

pub(super) extern "x86-interrupt" fn handler_df(stack: InterruptStackFrame, _code: u64) -> ! {
    log_error!("double fault rip={:#x}", stack.instruction_pointer.as_u64());
    crate::panic::halt_with_message("#DF");
}

pub(super) extern "x86-interrupt" fn handler_nmi(_stack: InterruptStackFrame) {
    log_warn!("NMI received");
}

pub(super) extern "x86-interrupt" fn handler_mc(stack: InterruptStackFrame) -> ! {
    log_error!("machine check rip={:#x}", stack.instruction_pointer.as_u64());
    crate::panic::halt_with_message("#MC");
}

pub(super) extern "x86-interrupt" fn handler_spurious(_stack: InterruptStackFrame) {
    // No EOI for true spurious interrupts.
}

/// xHCI interrupter vector. The driver polls its event ring; the vector just
/// acknowledges delivery so MSI-capable setups do not wedge.
pub(super) extern "x86-interrupt" fn handler_xhci(_stack: InterruptStackFrame) {
    crate::drivers::usb::xhci::note_interrupt();
    apic::end_of_interrupt();
}

/// Timer interrupt stub.
///
/// Pushes the general registers in the exact order `TrapFrame` expects (r15
/// ends up at the lowest address), hands the frame to the dispatcher, then
/// unwinds and IRETQs into whatever context the dispatcher left in the
/// frame.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn handler_timer_entry() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {dispatch}",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
        dispatch = sym timer_interrupt_dispatch,
    )
}

/// Scheduler tick. Counts the tick, lets the scheduler rewrite the frame if
/// a switch is due, and signals EOI as the final action before IRETQ.
extern "C" fn timer_interrupt_dispatch(frame: &mut TrapFrame) {
    TIMER_TICKS.fetch_add(1, Ordering::Relaxed);

    let cpu = crate::percpu::current_cpu_id();
    // Skip the tick rather than deadlock when the interrupted code holds the
    // scheduler lock.
    if let Some(mut sched) = crate::task::scheduler().try_lock() {
        sched.preempt(cpu, frame);
    }

    apic::end_of_interrupt();
}
