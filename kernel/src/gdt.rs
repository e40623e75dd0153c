//! Global Descriptor Table and Task State Segment.
//!
//! Long-mode segmentation is flat, but the privilege-transition machinery
//! still needs real descriptors: kernel and user code/data segments ordered
//! for SYSCALL/SYSRET, and a TSS carrying RSP0 (ring-3 -> ring-0 stack) plus
//! IST stacks for the faults that must never run on a suspect stack.

use core::mem::size_of;

/// Segment selectors. User selectors carry RPL 3.
pub const NULL_SELECTOR: u16 = 0x00;
pub const KERNEL_CS: u16 = 0x08;
pub const KERNEL_DS: u16 = 0x10;
pub const USER_DS: u16 = 0x18 | 3;
pub const USER_CS: u16 = 0x20 | 3;
pub const TSS_SELECTOR: u16 = 0x28;

/// IST indices (1-based in the IDT API).
pub const IST_INDEX_DF: u16 = 0;
pub const IST_INDEX_NMI: u16 = 1;
pub const IST_INDEX_PF: u16 = 2;
pub const IST_INDEX_MC: u16 = 3;

const ACCESS_PRESENT: u8 = 1 << 7;
const ACCESS_RING0: u8 = 0 << 5;
const ACCESS_RING3: u8 = 3 << 5;
const ACCESS_CODE_DATA: u8 = 1 << 4;
const ACCESS_EXECUTABLE: u8 = 1 << 3;
const ACCESS_RW: u8 = 1 << 1;
const ACCESS_TSS_AVAILABLE: u8 = 0x9;

const FLAGS_64BIT: u8 = 1 << 1;
const FLAGS_GRANULARITY: u8 = 1 << 3;

const IST_STACK_SIZE: usize = 16 * 1024;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    flags_limit: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        Self {
            limit_low: limit as u16,
            base_low: base as u16,
            base_middle: (base >> 16) as u8,
            access,
            flags_limit: (((limit >> 16) & 0xF) as u8) | (flags << 4),
            base_high: (base >> 24) as u8,
        }
    }

    const fn null() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u64,
}

/// 64-bit Task State Segment.
#[repr(C, packed)]
struct TaskStateSegment {
    _reserved0: u32,
    rsp0: u64,
    rsp1: u64,
    rsp2: u64,
    _reserved1: u64,
    ist: [u64; 7],
    _reserved2: u64,
    _reserved3: u16,
    iomap_base: u16,
}

impl TaskStateSegment {
    const fn zeroed() -> Self {
        Self {
            _reserved0: 0,
            rsp0: 0,
            rsp1: 0,
            rsp2: 0,
            _reserved1: 0,
            ist: [0; 7],
            _reserved2: 0,
            _reserved3: 0,
            iomap_base: size_of::<TaskStateSegment>() as u16,
        }
    }
}

// 8 slots: null, kernel code/data, user data/code, 16-byte TSS descriptor,
// one spare.
static mut GDT: [GdtEntry; 8] = [
    GdtEntry::null(),
    // Kernel code (0x08)
    GdtEntry::new(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_RING0 | ACCESS_CODE_DATA | ACCESS_EXECUTABLE | ACCESS_RW,
        FLAGS_64BIT | FLAGS_GRANULARITY,
    ),
    // Kernel data (0x10)
    GdtEntry::new(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_RING0 | ACCESS_CODE_DATA | ACCESS_RW,
        FLAGS_GRANULARITY,
    ),
    // User data (0x18); data before code so SYSRET's fixed offsets line up
    GdtEntry::new(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_RING3 | ACCESS_CODE_DATA | ACCESS_RW,
        FLAGS_GRANULARITY,
    ),
    // User code (0x20)
    GdtEntry::new(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_RING3 | ACCESS_CODE_DATA | ACCESS_EXECUTABLE | ACCESS_RW,
        FLAGS_64BIT | FLAGS_GRANULARITY,
    ),
    // TSS low + high (0x28/0x30), patched at setup time
    GdtEntry::null(),
    GdtEntry::null(),
    GdtEntry::null(),
];

static mut TSS: TaskStateSegment = TaskStateSegment::zeroed();

static mut IST_STACK_DF: [u8; IST_STACK_SIZE] = [0; IST_STACK_SIZE];
static mut IST_STACK_NMI: [u8; IST_STACK_SIZE] = [0; IST_STACK_SIZE];
static mut IST_STACK_PF: [u8; IST_STACK_SIZE] = [0; IST_STACK_SIZE];
static mut IST_STACK_MC: [u8; IST_STACK_SIZE] = [0; IST_STACK_SIZE];
static mut RSP0_STACK: [u8; IST_STACK_SIZE] = [0; IST_STACK_SIZE];

fn stack_top(base: *const u8, size: usize) -> u64 {
    ((base as u64) + size as u64) & !0xF
}

unsafe fn install_tss_descriptor() {
    let tss_base = core::ptr::addr_of!(TSS) as u64;
    let tss_limit = (size_of::<TaskStateSegment>() - 1) as u32;

    GDT[5] = GdtEntry::new(
        tss_base as u32,
        tss_limit,
        ACCESS_PRESENT | ACCESS_TSS_AVAILABLE,
        0,
    );
    // Upper half of the 16-byte system descriptor: bits 63:32 of the base.
    let high = (tss_base >> 32) as u32;
    GDT[6] = GdtEntry {
        limit_low: high as u16,
        base_low: (high >> 16) as u16,
        base_middle: 0,
        access: 0,
        flags_limit: 0,
        base_high: 0,
    };
}

/// Set up the GDT and TSS and reload every segment register.
///
/// # Safety
/// Must run once per CPU during early boot with interrupts disabled.
pub unsafe fn setup_gdt(kernel_stack_top: u64) {
    TSS.rsp0 = if kernel_stack_top != 0 {
        kernel_stack_top
    } else {
        stack_top(core::ptr::addr_of!(RSP0_STACK) as *const u8, IST_STACK_SIZE)
    };
    TSS.ist[IST_INDEX_DF as usize] =
        stack_top(core::ptr::addr_of!(IST_STACK_DF) as *const u8, IST_STACK_SIZE);
    TSS.ist[IST_INDEX_NMI as usize] =
        stack_top(core::ptr::addr_of!(IST_STACK_NMI) as *const u8, IST_STACK_SIZE);
    TSS.ist[IST_INDEX_PF as usize] =
        stack_top(core::ptr::addr_of!(IST_STACK_PF) as *const u8, IST_STACK_SIZE);
    TSS.ist[IST_INDEX_MC as usize] =
        stack_top(core::ptr::addr_of!(IST_STACK_MC) as *const u8, IST_STACK_SIZE);
    install_tss_descriptor();

    let gdt_ptr = GdtPointer {
        limit: (size_of::<[GdtEntry; 8]>() - 1) as u16,
        base: core::ptr::addr_of!(GDT) as u64,
    };
    core::arch::asm!(
        "lgdt [{ptr}]",
        ptr = in(reg) &gdt_ptr,
        options(readonly, nostack, preserves_flags)
    );

    // Reload CS with a far return, then the data segments and TR.
    core::arch::asm!(
        "push {cs}",
        "lea {tmp}, [rip + 2f]",
        "push {tmp}",
        "retfq",
        "2:",
        "mov ds, {ds:x}",
        "mov es, {ds:x}",
        "mov ss, {ds:x}",
        "mov fs, {zero:x}",
        "mov gs, {zero:x}",
        cs = in(reg) KERNEL_CS as u64,
        ds = in(reg) KERNEL_DS as u32,
        zero = in(reg) 0u32,
        tmp = lateout(reg) _,
        options(preserves_flags)
    );
    core::arch::asm!(
        "ltr {sel:x}",
        sel = in(reg) TSS_SELECTOR,
        options(nostack, preserves_flags)
    );
}

/// Update the ring-0 entry stack in the TSS. Called when the scheduler moves
/// a new task onto this CPU.
pub unsafe fn set_tss_rsp0(stack_top: u64) {
    TSS.rsp0 = stack_top;
}
