//! Constants shared between the loader contract and the kernel.

/// I/O port addresses
pub mod io_ports {
    /// QEMU debug output port - bytes written here land in QEMU's debug console
    pub const QEMU_DEBUG: u16 = 0xe9;

    /// QEMU isa-debug-exit port - writing here terminates QEMU with an exit code
    pub const QEMU_EXIT: u16 = 0xf4;

    /// Serial port base addresses (COM1-COM4)
    pub const COM1: u16 = 0x3f8;
    pub const COM2: u16 = 0x2f8;
    pub const COM3: u16 = 0x3e8;
    pub const COM4: u16 = 0x2e8;
}

/// Memory constants
pub mod memory {
    /// Page/frame size used throughout the kernel
    pub const PAGE_SIZE: u64 = 4096;

    /// UEFI memory descriptor type for conventional (usable) memory
    pub const UEFI_CONVENTIONAL_MEMORY: u32 = 7;
}
