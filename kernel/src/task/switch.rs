//! Context restore and privilege-lowering entry, the IRETQ plumbing under
//! the scheduler.
//!
//! Byte offsets in the assembly index into `CpuContext`; its field order is
//! load-bearing and documented there.

use super::CpuContext;

/// One-way restore of a saved context. Builds an IRETQ frame from the
/// context's SS:RSP, RFLAGS, CS:RIP, reloads CR3 when the context carries
/// one, loads every general register, and IRETQs. Never returns; the old
/// stack is abandoned.
///
/// # Safety
/// `context` must describe a resumable task: valid RIP/RSP under its CR3 and
/// selectors that exist in the GDT.
#[unsafe(naked)]
pub unsafe extern "C" fn restore_context(context: *const CpuContext) -> ! {
    core::arch::naked_asm!(
        // CR3 first, while every context field is still readable through the
        // identity mapping.
        "mov rax, [rdi + 0xA0]",
        "test rax, rax",
        "jz 2f",
        "mov cr3, rax",
        "2:",
        // IRETQ frame: SS, RSP, RFLAGS, CS, RIP.
        "push qword ptr [rdi + 0x98]",
        "push qword ptr [rdi + 0x80]",
        "push qword ptr [rdi + 0x88]",
        "push qword ptr [rdi + 0x90]",
        "push qword ptr [rdi + 0x78]",
        // General registers; RDI last, it is the context pointer.
        "mov rax, [rdi + 0x00]",
        "mov rbx, [rdi + 0x08]",
        "mov rcx, [rdi + 0x10]",
        "mov rdx, [rdi + 0x18]",
        "mov rsi, [rdi + 0x20]",
        "mov rbp, [rdi + 0x30]",
        "mov r8,  [rdi + 0x38]",
        "mov r9,  [rdi + 0x40]",
        "mov r10, [rdi + 0x48]",
        "mov r11, [rdi + 0x50]",
        "mov r12, [rdi + 0x58]",
        "mov r13, [rdi + 0x60]",
        "mov r14, [rdi + 0x68]",
        "mov r15, [rdi + 0x70]",
        "mov rdi, [rdi + 0x28]",
        "iretq",
    )
}

/// Enter `entry` on `stack_top` at ring 3 through a synthesized IRETQ frame
/// with RFLAGS=0x200 (interrupts enabled). Selectors are the user segments
/// (0x1B data, 0x23 code).
///
/// # Safety
/// `entry` and the stack must be mapped user-accessible; the function must
/// not return (it has no frame to return into).
#[unsafe(naked)]
pub unsafe extern "C" fn call_lowered_entry(entry: extern "C" fn() -> !, stack_top: u64) -> ! {
    core::arch::naked_asm!(
        "push 0x1B",     // SS: user data
        "push rsi",      // RSP: supplied stack top
        "push 0x200",    // RFLAGS: IF set
        "push 0x23",     // CS: user code
        "push rdi",      // RIP: entry
        "iretq",
    )
}
