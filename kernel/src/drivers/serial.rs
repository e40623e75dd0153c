//! Serial port driver (COM1-COM4).
//!
//! 115200-8N1, byte-at-a-time polled writes. COM1 mirrors the kernel log so
//! headless runs keep a readable dmesg stream.

use x86_64::instructions::port::Port;

use nimbus_shared::constants::io_ports;

const LINE_STATUS_THR_EMPTY: u8 = 1 << 5;

/// Program one UART for 115200-8N1 with FIFOs enabled.
fn init_port(base: u16) {
    unsafe {
        let mut int_enable: Port<u8> = Port::new(base + 1);
        let mut fifo_ctrl: Port<u8> = Port::new(base + 2);
        let mut line_ctrl: Port<u8> = Port::new(base + 3);
        let mut modem_ctrl: Port<u8> = Port::new(base + 4);
        let mut divisor_lo: Port<u8> = Port::new(base);
        let mut divisor_hi: Port<u8> = Port::new(base + 1);

        int_enable.write(0x00u8);
        // DLAB on, divisor 1 -> 115200 baud
        line_ctrl.write(0x80u8);
        divisor_lo.write(0x01u8);
        divisor_hi.write(0x00u8);
        // 8 data bits, no parity, one stop bit; DLAB off
        line_ctrl.write(0x03u8);
        // Enable FIFO, clear both queues, 14-byte threshold
        fifo_ctrl.write(0xC7u8);
        // DTR | RTS | OUT2
        modem_ctrl.write(0x0Bu8);
    }
}

/// Initialize COM1 through COM4 and mark the log sink usable.
pub fn init_all() {
    for base in [
        io_ports::COM1,
        io_ports::COM2,
        io_ports::COM3,
        io_ports::COM4,
    ] {
        init_port(base);
    }
    crate::logging::output::set_serial_ready();
}

/// Write one byte to COM1, polling the line-status register.
pub fn write_byte(byte: u8) {
    unsafe {
        let mut line_status: Port<u8> = Port::new(io_ports::COM1 + 5);
        let mut data: Port<u8> = Port::new(io_ports::COM1);
        while line_status.read() & LINE_STATUS_THR_EMPTY == 0 {
            core::hint::spin_loop();
        }
        data.write(byte);
    }
}

/// Write a byte slice to COM1.
pub fn write_bytes(bytes: &[u8]) {
    for &byte in bytes {
        write_byte(byte);
    }
}
