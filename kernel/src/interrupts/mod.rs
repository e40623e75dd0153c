//! Interrupt subsystem: IDT installation, vector assignments, and the trap
//! frame the preemption path works on.
//!
//! Vector map:
//! - 0-31: CPU exceptions
//! - 0x40: LAPIC timer (scheduler tick)
//! - 0x50: xHCI interrupter
//! - 0xFE: LAPIC error
//! - 0xFF: spurious

pub mod apic;
pub mod handlers;
pub mod timer;

pub use apic::{end_of_interrupt, read_register, send_ipi, write_register};
pub use timer::{lapic_timer_configure, lapic_timer_mask, lapic_timer_start_periodic, timer_tick_count};

use core::sync::atomic::AtomicU32;

use spin::Once;
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::VirtAddr;

use crate::task::CpuContext;

/// LAPIC timer interrupt vector.
pub const APIC_TIMER_VECTOR: u8 = 0x40;

/// Vector assigned to the xHCI interrupter.
pub const XHCI_VECTOR: u8 = 0x50;

/// LAPIC error vector.
pub const APIC_ERROR_VECTOR: u8 = 0xFE;

/// Spurious interrupt vector (also programmed into the SIVR).
pub const SPURIOUS_VECTOR: u8 = 0xFF;

/// Ticks delivered by the LAPIC timer since boot.
pub static TIMER_TICKS: AtomicU32 = AtomicU32::new(0);

static IDT: Once<InterruptDescriptorTable> = Once::new();

/// Register state captured by the timer interrupt stub, lowest address
/// first. The hardware-pushed tail (RIP..SS) follows the general registers;
/// the stub's push order must stay in sync with this layout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    // Pushed by the CPU:
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// Snapshot this frame (plus the live CR3) as a task context.
    pub fn capture_context(&self) -> CpuContext {
        use x86_64::registers::control::Cr3;
        let (cr3_frame, _) = Cr3::read();
        CpuContext {
            rax: self.rax,
            rbx: self.rbx,
            rcx: self.rcx,
            rdx: self.rdx,
            rsi: self.rsi,
            rdi: self.rdi,
            rbp: self.rbp,
            r8: self.r8,
            r9: self.r9,
            r10: self.r10,
            r11: self.r11,
            r12: self.r12,
            r13: self.r13,
            r14: self.r14,
            r15: self.r15,
            rip: self.rip,
            rsp: self.rsp,
            rflags: self.rflags,
            cs: self.cs,
            ss: self.ss,
            cr3: cr3_frame.start_address().as_u64(),
        }
    }

    /// Overwrite this frame so the IRETQ path resumes `context`. A context
    /// with zero selectors (never scheduled out yet) keeps the frame's own.
    pub fn apply_context(&mut self, context: &CpuContext) {
        self.rax = context.rax;
        self.rbx = context.rbx;
        self.rcx = context.rcx;
        self.rdx = context.rdx;
        self.rsi = context.rsi;
        self.rdi = context.rdi;
        self.rbp = context.rbp;
        self.r8 = context.r8;
        self.r9 = context.r9;
        self.r10 = context.r10;
        self.r11 = context.r11;
        self.r12 = context.r12;
        self.r13 = context.r13;
        self.r14 = context.r14;
        self.r15 = context.r15;
        self.rip = context.rip;
        self.rsp = context.rsp;
        self.rflags = context.rflags | 0x200;
        if context.cs != 0 {
            self.cs = context.cs;
            self.ss = context.ss;
        }
        if context.cr3 != 0 {
            use x86_64::registers::control::{Cr3, Cr3Flags};
            use x86_64::structures::paging::PhysFrame;
            use x86_64::PhysAddr;
            let (current, _) = Cr3::read();
            if current.start_address().as_u64() != context.cr3 {
                unsafe {
                    Cr3::write(
                        PhysFrame::containing_address(PhysAddr::new(context.cr3)),
                        Cr3Flags::empty(),
                    );
                }
            }
        }
    }
}

/// Build and load the IDT.
///
/// # Safety
/// Must run before interrupts are enabled; the table lives for the kernel's
/// lifetime via `Once`.
pub unsafe fn setup_idt() {
    let idt = IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();

        idt.divide_error.set_handler_fn(handlers::handler_de);
        idt.breakpoint.set_handler_fn(handlers::handler_bp);
        idt.invalid_opcode.set_handler_fn(handlers::handler_ud);
        idt.general_protection_fault
            .set_handler_fn(handlers::handler_gp);

        {
            use crate::gdt::{IST_INDEX_DF, IST_INDEX_MC, IST_INDEX_NMI, IST_INDEX_PF};
            unsafe {
                idt.double_fault
                    .set_handler_fn(handlers::handler_df)
                    .set_stack_index(IST_INDEX_DF);
                idt.non_maskable_interrupt
                    .set_handler_fn(handlers::handler_nmi)
                    .set_stack_index(IST_INDEX_NMI);
                idt.page_fault
                    .set_handler_fn(handlers::handler_pf)
                    .set_stack_index(IST_INDEX_PF);
                idt.machine_check
                    .set_handler_fn(handlers::handler_mc)
                    .set_stack_index(IST_INDEX_MC);
            }
        }

        // The timer stub is a raw naked handler (it needs the full register
        // frame for preemption), registered by address.
        unsafe {
            idt[APIC_TIMER_VECTOR]
                .set_handler_addr(VirtAddr::new(handlers::handler_timer_entry as usize as u64));
        }

        idt[XHCI_VECTOR].set_handler_fn(handlers::handler_xhci);
        idt[APIC_ERROR_VECTOR].set_handler_fn(handlers::handler_spurious);
        idt[SPURIOUS_VECTOR].set_handler_fn(handlers::handler_spurious);

        idt
    });
    idt.load();
}

/// Whether maskable interrupts are currently enabled.
pub fn interrupts_enabled() -> bool {
    x86_64::instructions::interrupts::are_enabled()
}
