//! NimbusOS kernel binary.
//!
//! The pre-kernel loader jumps here with the physical address of the boot
//! parameter block in RDI. The entry stub moves onto the kernel stack the
//! loader allocated, then the boot path copies and validates the block and
//! brings the environment up.

#![no_std]
#![no_main]

extern crate nimbus_kernel;

use nimbus_kernel::{
    kernel_idle, log_error, log_info, receive_boot_info, setup_kernel_environment,
    validate_boot_info,
};
use nimbus_shared::handoff::BootInfo;

const PAGE_SIZE: u64 = 4096;

/// Kernel entry point. Switches to the loader-provided kernel stack and
/// tail-jumps into `kernel_start`; nothing may run before the stack switch.
#[no_mangle]
pub extern "C" fn kernel_main(boot_info_addr: u64) -> ! {
    if boot_info_addr == 0 {
        // Stay on the loader stack; the boot path reports and halts.
        kernel_start(boot_info_addr);
    }
    unsafe {
        let stack_base = (*(boot_info_addr as *const BootInfo)).kernel_stack_base;
        let stack_top = (stack_base + PAGE_SIZE) & !0xF;
        core::arch::asm!(
            "mov rsp, {stack}",
            "jmp {entry}",
            stack = in(reg) stack_top,
            entry = sym kernel_start,
            in("rdi") boot_info_addr,
            options(noreturn)
        )
    }
}

extern "C" fn kernel_start(boot_info_addr: u64) -> ! {
    nimbus_kernel::logging::init();
    nimbus_kernel::drivers::serial::init_all();
    log_info!("=== NimbusOS kernel starting ===");

    if boot_info_addr == 0 {
        nimbus_kernel::panic::halt_with_message("boot parameter block address is null");
    }

    let info = unsafe { receive_boot_info(boot_info_addr) };
    match validate_boot_info(info) {
        Ok(()) => log_info!("boot info validated"),
        Err(msg) => {
            log_error!("boot info validation failed: {}", msg);
            nimbus_kernel::panic::halt_with_message("invalid boot parameter block");
        }
    }

    setup_kernel_environment(info);

    if nimbus_kernel::config::KERNEL_SHOULD_IDLE {
        // Lower the boot thread to ring 3; from here on privileged work
        // happens only inside elevated regions.
        log_info!("lowering boot thread, entering idle loop");
        nimbus_kernel::percpu::set_elevated(nimbus_kernel::percpu::current_cpu_id(), false);
        unsafe {
            let stack_top = (core::ptr::addr_of!(LOWERED_IDLE_STACK) as u64
                + LOWERED_IDLE_STACK_SIZE as u64)
                & !0xF;
            nimbus_kernel::task::switch::call_lowered_entry(lowered_idle, stack_top)
        }
    } else {
        nimbus_shared::qemu_exit_ok!();
        loop {
            x86_64::instructions::hlt();
        }
    }
}

const LOWERED_IDLE_STACK_SIZE: usize = 16 * 1024;

static mut LOWERED_IDLE_STACK: [u8; LOWERED_IDLE_STACK_SIZE] = [0; LOWERED_IDLE_STACK_SIZE];

/// Ring-3 continuation of the boot thread.
extern "C" fn lowered_idle() -> ! {
    kernel_idle()
}
