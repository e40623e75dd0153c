//! Kernel environment setup: the ordered bring-up of every subsystem after
//! the boot parameter block has been received and validated.

use nimbus_shared::handoff::BootInfo;

use crate::config;
use crate::memory::{self, PAGE_SIZE};
use crate::{log_debug, log_info, log_warn};

/// Mask every interrupt source the firmware may have left armed: the IF
/// flag, NMI (CMOS index port bit 7), and both legacy PIC controllers.
unsafe fn disable_all_interrupts() {
    use x86_64::instructions::port::Port;

    x86_64::instructions::interrupts::disable();

    let mut cmos_index: Port<u8> = Port::new(0x70);
    cmos_index.write(0x80u8);

    let mut pic_master: Port<u8> = Port::new(0x21);
    let mut pic_slave: Port<u8> = Port::new(0xA1);
    pic_master.write(0xFFu8);
    pic_slave.write(0xFFu8);
}

/// Lock every frame the boot handoff makes the kernel responsible for:
/// the kernel image segments, the boot font, and the framebuffer.
fn lock_boot_regions(info: &BootInfo) {
    let mut pfa = memory::frame_allocator().lock();

    for segment in &info.kernel_segments[..info.kernel_segment_count as usize] {
        let pages = segment.size / PAGE_SIZE as u64 + 1;
        pfa.lock_pages(segment.physical_base, pages);
    }
    if info.font_ptr != 0 {
        pfa.lock_page(info.font_ptr);
    }
    if info.framebuffer.base != 0 {
        let pages = info.framebuffer.size / PAGE_SIZE as u64 + 1;
        pfa.lock_pages(info.framebuffer.base, pages);
    }
    if info.kernel_stack_base != 0 {
        pfa.lock_page(info.kernel_stack_base);
    }
}

/// Re-map every kernel ELF segment with the USERSPACE policy so the lowered
/// boot continuation (and ring-3 kernel threads) can execute and read the
/// image. Identity of virtual to physical is preserved; only the USER bit
/// changes, propagated down the table walk.
fn remap_kernel_user_accessible(info: &BootInfo) {
    {
        let root = memory::current_top_level_table();
        let mut pfa = memory::frame_allocator().lock();
        for segment in &info.kernel_segments[..info.kernel_segment_count as usize] {
            let pages = segment.size / PAGE_SIZE as u64 + 1;
            for i in 0..pages {
                let offset = i * PAGE_SIZE as u64;
                unsafe {
                    memory::map_page(
                        root,
                        segment.virtual_base + offset,
                        segment.physical_base + offset,
                        memory::USERSPACE_PAGE,
                        &mut *pfa,
                    );
                }
            }
        }
        if info.kernel_stack_base != 0 {
            unsafe {
                memory::map_page(
                    root,
                    info.kernel_stack_base,
                    info.kernel_stack_base,
                    memory::USERSPACE_PAGE,
                    &mut *pfa,
                );
            }
        }
    }
    memory::flush_tlb_all();
}

/// Full kernel bring-up. On return every subsystem is live: GDT/TSS,
/// syscalls, IDT, frame allocator, heap, LAPIC (+timer), ACPI summary, and
/// the scheduler's bootstrap task. Interrupts are enabled.
pub fn setup_kernel_environment(info: &BootInfo) {
    unsafe {
        disable_all_interrupts();
    }

    let stack_top = if info.kernel_stack_base != 0 {
        (info.kernel_stack_base + PAGE_SIZE as u64) & !0xF
    } else {
        0
    };
    unsafe {
        crate::gdt::setup_gdt(stack_top);
        crate::syscall::enable_syscall_interface();
        crate::interrupts::setup_idt();
    }
    log_debug!("GDT/TSS, syscall interface, and IDT installed");

    // The boot thread becomes the BSP swapper task (pid 1). It runs at ring 0
    // until it lowers itself, so the per-CPU elevation flag starts set.
    crate::task::init_bootstrap_task();
    crate::percpu::set_elevated(crate::percpu::current_cpu_id(), true);

    {
        let map = &info.memory_map;
        let mut pfa = memory::frame_allocator().lock();
        unsafe {
            pfa.init_from_memory_map(map.base, map.descriptor_size, map.descriptor_count);
        }
    }
    lock_boot_regions(info);
    memory::set_paging_active();

    memory::heap::init_kernel_heap(config::KERNEL_HEAP_PAGES);
    log_debug!("kernel heap ready ({} pages)", config::KERNEL_HEAP_PAGES);

    // The lowered-execution model runs kernel code at ring 3 between
    // elevated regions, so the kernel image itself must be reachable from
    // user mode.
    remap_kernel_user_accessible(info);

    {
        let pfa = memory::frame_allocator().lock();
        log_info!("System total memory : {} MB", pfa.total_memory() / 1024 / 1024);
        log_info!("System free memory  : {} MB", pfa.free_memory() / 1024 / 1024);
        log_info!("System used memory  : {} MB", pfa.used_memory() / 1024 / 1024);
    }
    log_info!(
        "Kernel loaded at phys {:#x}, {} segment(s)",
        info.kernel_segments[0].physical_base,
        info.kernel_segment_count
    );

    unsafe {
        crate::interrupts::apic::initialize();
    }

    match crate::acpi::init(info.rsdp) {
        Ok(summary) => {
            if summary.local_apic_address != 0
                && summary.local_apic_address != crate::interrupts::apic::mmio_base()
            {
                log_warn!(
                    "MADT LAPIC address {:#x} differs from MSR-reported base",
                    summary.local_apic_address
                );
            }
        }
        Err(err) => log_warn!("ACPI init skipped: {}", err),
    }

    unsafe {
        crate::interrupts::lapic_timer_configure();
        crate::interrupts::lapic_timer_start_periodic(config::TIMER_INITIAL_COUNT);
    }
    x86_64::instructions::interrupts::enable();
    log_debug!("scheduler tick armed, interrupts enabled");

    if config::XHCI_MMIO_BASE != 0 {
        match crate::drivers::usb::xhci::init_controller(config::XHCI_MMIO_BASE) {
            Ok(()) => log_info!("xHCI controller initialized"),
            Err(err) => log_warn!("xHCI bring-up failed: {:?}", err),
        }
    }

    // First ring-3 kernel thread; it announces itself from an elevated
    // region and exits through the voluntary-exit path.
    unsafe {
        let stack_top = (core::ptr::addr_of!(SMOKE_THREAD_STACK) as u64
            + SMOKE_THREAD_STACK_SIZE as u64)
            & !0xF;
        if crate::task::spawn_kernel_thread(2, kernel_thread_smoke, stack_top).is_none() {
            log_warn!("run queue full, smoke thread not started");
        }
    }

    log_info!("=== kernel environment setup complete ===");
}

const SMOKE_THREAD_STACK_SIZE: usize = 16 * 1024;

static mut SMOKE_THREAD_STACK: [u8; SMOKE_THREAD_STACK_SIZE] = [0; SMOKE_THREAD_STACK_SIZE];

extern "C" fn kernel_thread_smoke() -> ! {
    crate::syscall::with_elevated(|| log_info!("kernel thread pid 2 online"));
    crate::task::exit_kernel_thread()
}

/// Idle loop, callable from the lowered (ring 3) boot continuation: driver
/// events and the halt both run inside an elevated region, paired on every
/// iteration.
pub fn kernel_idle() -> ! {
    loop {
        crate::syscall::with_elevated(|| {
            crate::drivers::usb::xhci::poll_events();
            x86_64::instructions::hlt();
        });
        core::hint::spin_loop();
    }
}
