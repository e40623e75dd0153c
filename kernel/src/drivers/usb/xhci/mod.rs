//! xHCI host controller driver.
//!
//! Bring-up order follows the spec: map MMIO, parse capabilities, walk the
//! extended capability list for the USB3 port set, halt + reset the
//! controller and verify register defaults, program the operational and
//! runtime blocks (DCBAA, command ring, event ring - ERDP strictly before
//! ERSTBA), start it, then drive every port through the reset state machine
//! and enumerate whatever is connected.
//!
//! The hot protocol pieces (reset, port reset, ring discipline) are generic
//! over `RegisterSpace`, so the integration tests run them against a mock
//! controller that honors the same register semantics as silicon.

pub mod context;
pub mod regs;
pub mod rings;
pub mod trb;

use alloc::vec::Vec;
use core::sync::atomic::{fence, AtomicBool, Ordering};

use spin::Mutex;

use crate::memory::{self, AllocError, CACHE_DISABLED, KERNEL_PAGE, PAGE_SIZE};
use crate::time::sleep_ms;
use crate::{log_debug, log_info, log_warn};

use context::{DeviceContext, DeviceContextBaseArray, InputContext, ADD_SLOT_AND_EP0};
use regs::{
    default_max_packet_size, portsc_preserve, CapabilitySnapshot, MmioSpace, RegisterSpace,
    ERDP_EHB, IMAN_IE, IMAN_IP, IR_ERDP, IR_ERSTBA, IR_ERSTSZ, IR_IMAN, IR_IMOD, OP_CONFIG,
    OP_CRCR, OP_DCBAAP, OP_DNCTRL, OP_PAGESIZE, OP_PORTSC_BASE, OP_PORTSC_STRIDE, OP_USBCMD,
    OP_USBSTS, PORTSC_CCS, PORTSC_CHANGE_BITS, PORTSC_CSC, PORTSC_PED, PORTSC_PP, PORTSC_PR,
    PORTSC_PRC, PORTSC_SPEED_SHIFT, PORTSC_WPR, PORTSC_WRC, RT_IR_BASE, USBCMD_HCRESET,
    USBCMD_HOSTSYS_ERROR_ENABLE, USBCMD_INTERRUPTER_ENABLE, USBCMD_RUN_STOP, USBSTS_CNR,
    USBSTS_EINT, USBSTS_HCE, USBSTS_HCH, USBSTS_HSE,
};
use rings::{EventRing, ProducerRing};
use trb::{Trb, COMPLETION_SUCCESS};

/// The driver maps at least the first 128 KiB of controller space.
const MMIO_WINDOW: usize = 0x20000;

pub const COMMAND_RING_TRBS: usize = 256;
pub const EVENT_RING_TRBS: usize = 256;

const COMMAND_TIMEOUT_MS: u64 = 1000;
const TRANSFER_TIMEOUT_MS: u64 = 1000;

/// Driver-level failures. Completion codes other than SUCCESS are returned
/// verbatim so the caller decides recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XhciError {
    /// Controller would not halt within 20 ms.
    HaltTimeout,
    /// HCRESET or CNR stuck past 100 ms.
    ResetTimeout,
    /// Operational registers not at their defaults after reset.
    NonZeroDefaults,
    /// USBSTS reports HCE/HSE.
    HardwareError,
    /// No Command Completion Event within the timeout.
    CommandTimeout,
    /// No Transfer Event within the timeout.
    TransferTimeout,
    /// Command or transfer completed with a code other than SUCCESS.
    Completion(u32),
    OutOfMemory,
    NoFreeSlot,
    ProtocolError,
    Unsupported,
}

impl From<AllocError> for XhciError {
    fn from(_: AllocError) -> Self {
        XhciError::OutOfMemory
    }
}

/// Halt the controller, reset it, and verify the operational registers read
/// their defaults.
///
/// Halt: clear RUN_STOP, wait up to 20 ms for HCH. Reset: set HCRESET, wait
/// up to 100 ms for HCRESET and CNR to clear, sleep 50 ms, then require
/// USBCMD, DNCTRL, CRCR, DCBAAP, CONFIG all zero.
pub fn reset_host_controller<S: RegisterSpace>(regs: &mut S, op: u64) -> Result<(), XhciError> {
    let usbcmd = regs.read32(op + OP_USBCMD);
    regs.write32(op + OP_USBCMD, usbcmd & !USBCMD_RUN_STOP);

    let mut timeout = 20;
    while regs.read32(op + OP_USBSTS) & USBSTS_HCH == 0 {
        timeout -= 1;
        if timeout == 0 {
            log_warn!("xHCI: controller did not halt within 20ms");
            return Err(XhciError::HaltTimeout);
        }
        sleep_ms(1);
    }

    let usbcmd = regs.read32(op + OP_USBCMD);
    regs.write32(op + OP_USBCMD, usbcmd | USBCMD_HCRESET);

    let mut timeout = 100;
    while regs.read32(op + OP_USBCMD) & USBCMD_HCRESET != 0
        || regs.read32(op + OP_USBSTS) & USBSTS_CNR != 0
    {
        timeout -= 1;
        if timeout == 0 {
            log_warn!("xHCI: controller did not reset within 100ms");
            return Err(XhciError::ResetTimeout);
        }
        sleep_ms(1);
    }

    sleep_ms(50);

    if regs.read32(op + OP_USBCMD) != 0
        || regs.read32(op + OP_DNCTRL) != 0
        || regs.read64(op + OP_CRCR) != 0
        || regs.read64(op + OP_DCBAAP) != 0
        || regs.read32(op + OP_CONFIG) != 0
    {
        log_warn!("xHCI: operational registers not at defaults after reset");
        return Err(XhciError::NonZeroDefaults);
    }

    Ok(())
}

/// Set RUN_STOP plus the interrupter and host-system-error enables, then
/// wait for HCH to clear.
pub fn start_host_controller<S: RegisterSpace>(regs: &mut S, op: u64) {
    let usbcmd = regs.read32(op + OP_USBCMD)
        | USBCMD_RUN_STOP
        | USBCMD_INTERRUPTER_ENABLE
        | USBCMD_HOSTSYS_ERROR_ENABLE;
    regs.write32(op + OP_USBCMD, usbcmd);

    while regs.read32(op + OP_USBSTS) & USBSTS_HCH != 0 {
        sleep_ms(16);
    }
}

fn portsc_offset(op: u64, port: u8) -> u64 {
    op + OP_PORTSC_BASE + OP_PORTSC_STRIDE * port as u64
}

/// Drive one port through the reset state machine. `port` is zero-based.
///
/// Power the port if needed (20 ms grace, fail if PP stays low), acknowledge
/// CSC, request a warm reset on USB3 ports or a hot reset on USB2 ports,
/// then poll up to 500 ms for the reset-change bit. PRC is accepted as the
/// completion signal for USB3 ports too; the spec allows it to fire for
/// both reset flavors. On completion, wait 3 ms and require PED.
pub fn reset_port<S: RegisterSpace>(regs: &mut S, op: u64, port: u8, usb3: bool) -> bool {
    let portsc_off = portsc_offset(op, port);
    let mut portsc = regs.read32(portsc_off);

    if portsc & PORTSC_PP == 0 {
        regs.write32(portsc_off, portsc_preserve(portsc) | PORTSC_PP);
        sleep_ms(20);
        portsc = regs.read32(portsc_off);
        if portsc & PORTSC_PP == 0 {
            log_warn!("Port {}: Bad Reset", port);
            return false;
        }
    }

    // Acknowledge any stale connect-status change (RW1C: write the one bit).
    regs.write32(portsc_off, portsc_preserve(portsc) | PORTSC_CSC);

    let reset_bit = if usb3 { PORTSC_WPR } else { PORTSC_PR };
    portsc = regs.read32(portsc_off);
    regs.write32(portsc_off, portsc_preserve(portsc) | reset_bit);

    let mut timeout = 500;
    let completed = loop {
        portsc = regs.read32(portsc_off);
        if usb3 && portsc & (PORTSC_WRC | PORTSC_PRC) != 0 {
            break true;
        }
        if !usb3 && portsc & PORTSC_PRC != 0 {
            break true;
        }
        timeout -= 1;
        if timeout == 0 {
            break false;
        }
        sleep_ms(1);
    };

    if !completed {
        return false;
    }

    sleep_ms(3);
    portsc = regs.read32(portsc_off);
    if portsc & PORTSC_PED != 0 {
        regs.write32(portsc_off, portsc_preserve(portsc) | PORTSC_CSC);
        return true;
    }
    false
}

/// Walk the extended capability list from `xecp` (byte offset) and collect
/// the zero-based port numbers covered by USB 3.x Supported Protocol
/// entries. The list is forward-only; a zero next-pointer terminates it.
pub fn collect_usb3_ports<S: RegisterSpace>(regs: &S, xecp: u64) -> Vec<u8> {
    const CAP_ID_SUPPORTED_PROTOCOL: u32 = 2;
    let mut ports = Vec::new();
    if xecp == 0 {
        return ports;
    }
    let mut offset = xecp;
    loop {
        let header = regs.read32(offset);
        let cap_id = header & 0xFF;
        if cap_id == CAP_ID_SUPPORTED_PROTOCOL {
            let major = (header >> 24) & 0xFF;
            if major == 3 {
                let port_range = regs.read32(offset + 8);
                let first_port = (port_range & 0xFF) as u8; // 1-based
                let count = ((port_range >> 8) & 0xFF) as u8;
                for i in 0..count {
                    ports.push(first_port - 1 + i);
                }
            }
        }
        let next = (header >> 8) & 0xFF;
        if next == 0 {
            break;
        }
        offset += next as u64 * 4;
    }
    ports
}

/// Fixed-capacity table of command waiters keyed by the command TRB's
/// physical address. The event-ring consumer posts the completion; the
/// issuer sleep-polls its slot.
struct CommandWaiters {
    slots: [CommandWaiter; 16],
}

#[derive(Clone, Copy)]
struct CommandWaiter {
    key: u64,
    in_use: bool,
    completed: bool,
    code: u32,
    slot_id: u8,
}

impl CommandWaiters {
    const fn new() -> Self {
        const EMPTY: CommandWaiter = CommandWaiter {
            key: 0,
            in_use: false,
            completed: false,
            code: 0,
            slot_id: 0,
        };
        Self { slots: [EMPTY; 16] }
    }

    fn register(&mut self, key: u64) -> bool {
        for slot in self.slots.iter_mut() {
            if !slot.in_use {
                *slot = CommandWaiter {
                    key,
                    in_use: true,
                    completed: false,
                    code: 0,
                    slot_id: 0,
                };
                return true;
            }
        }
        false
    }

    fn complete(&mut self, key: u64, code: u32, slot_id: u8) {
        for slot in self.slots.iter_mut() {
            if slot.in_use && slot.key == key {
                slot.completed = true;
                slot.code = code;
                slot.slot_id = slot_id;
                return;
            }
        }
        log_debug!("xHCI: unmatched command completion for {:#x}", key);
    }

    fn take(&mut self, key: u64) -> Option<(u32, u8)> {
        for slot in self.slots.iter_mut() {
            if slot.in_use && slot.key == key && slot.completed {
                slot.in_use = false;
                return Some((slot.code, slot.slot_id));
            }
        }
        None
    }

    fn cancel(&mut self, key: u64) {
        for slot in self.slots.iter_mut() {
            if slot.in_use && slot.key == key {
                slot.in_use = false;
            }
        }
    }
}

/// Per-device state for an enabled slot.
struct DeviceSlot {
    slot_id: u8,
    port: u8,
    speed: u8,
    device_context: DeviceContext,
    input_context: InputContext,
    control_ring: ProducerRing,
    max_packet_size: u16,
    addressed: bool,
}

/// One xHCI controller instance, generic over the register space so tests
/// can substitute a mock controller for silicon.
pub struct XhciDriver<S: RegisterSpace> {
    regs: S,
    caps: CapabilitySnapshot,
    op: u64,
    rt: u64,
    db: u64,
    hc_page_size: u64,
    usb3_ports: Vec<u8>,
    command_ring: ProducerRing,
    event_ring: EventRing,
    dcbaa: DeviceContextBaseArray,
    devices: Vec<DeviceSlot>,
    waiters: CommandWaiters,
    /// Tag and result of the most recent control transfer.
    pending_transfer: Option<(u64, Option<(u32, u32)>)>,
}

impl XhciDriver<MmioSpace> {
    /// Bring up the controller behind `bar` (PCI BAR0, 64-bit MMIO).
    pub fn init(bar: u64) -> Result<Self, XhciError> {
        map_controller_window(bar);
        let regs = unsafe { MmioSpace::new(bar) };
        Self::with_register_space(regs)
    }
}

impl<S: RegisterSpace> XhciDriver<S> {
    /// Full bring-up over an already-reachable register space.
    pub fn with_register_space(regs: S) -> Result<Self, XhciError> {
        let caps = CapabilitySnapshot::parse(&regs);
        log_info!(
            "xHCI: HCI v{}.{:02x} slots={} interrupters={} ports={} csz={}",
            caps.hci_version >> 8,
            caps.hci_version & 0xFF,
            caps.max_slots,
            caps.max_interrupters,
            caps.max_ports,
            caps.context_size()
        );
        log_debug!(
            "xHCI: ist={} erst_max={} scratchpads={} ac64={} ppc={}",
            caps.isochronous_scheduling_threshold,
            caps.erst_max,
            caps.max_scratchpad_buffers,
            caps.addressing_64bit,
            caps.port_power_control
        );

        let op = caps.operational_offset();
        let rt = caps.runtime_offset;
        let db = caps.doorbell_offset;

        let usb3_ports = collect_usb3_ports(&regs, caps.xecp_offset);
        log_debug!("xHCI: USB3 ports: {:?}", usb3_ports);

        let mut driver = Self {
            regs,
            caps,
            op,
            rt,
            db,
            hc_page_size: 0,
            usb3_ports,
            command_ring: ProducerRing::allocate(COMMAND_RING_TRBS)?,
            event_ring: EventRing::allocate(EVENT_RING_TRBS)?,
            dcbaa: DeviceContextBaseArray::allocate(caps.max_slots, caps.max_scratchpad_buffers)?,
            devices: Vec::new(),
            waiters: CommandWaiters::new(),
            pending_transfer: None,
        };

        reset_host_controller(&mut driver.regs, driver.op)?;
        driver.configure_operational();
        driver.configure_runtime();
        start_host_controller(&mut driver.regs, driver.op);
        log_info!("xHCI: controller running");

        driver.reset_all_ports();
        Ok(driver)
    }

    /// Program the operational block: page size, device notifications, slot
    /// count, DCBAAP, CRCR.
    fn configure_operational(&mut self) {
        self.hc_page_size = ((self.regs.read32(self.op + OP_PAGESIZE) & 0xFFFF) as u64) << 12;
        log_debug!("xHCI: controller page size {} bytes", self.hc_page_size);

        // Enable all device-notification classes.
        self.regs.write32(self.op + OP_DNCTRL, 0xFFFF);
        self.regs
            .write32(self.op + OP_CONFIG, self.caps.max_slots as u32);

        self.regs
            .write64(self.op + OP_DCBAAP, self.dcbaa.phys_addr());

        let crcr = (self.command_ring.phys_base() & !0x3F)
            | if self.command_ring.cycle_state() { 1 } else { 0 };
        self.regs.write64(self.op + OP_CRCR, crcr);

        log_debug!(
            "xHCI: dcbaa={:#x} crcr={:#x} scratchpads={}",
            self.dcbaa.phys_addr(),
            crcr,
            self.dcbaa.scratchpad_count()
        );
    }

    /// Program interrupter 0. ERDP must be written before ERSTBA: the
    /// controller starts fetching the segment table as soon as the base is
    /// in place.
    fn configure_runtime(&mut self) {
        let ir0 = self.rt + RT_IR_BASE;
        self.regs.write32(ir0 + IR_IMOD, 0);
        self.regs
            .write32(ir0 + IR_ERSTSZ, 1);
        self.regs
            .write64(ir0 + IR_ERDP, self.event_ring.dequeue_pointer());
        self.regs
            .write64(ir0 + IR_ERSTBA, self.event_ring.erst_phys_base());

        let iman = self.regs.read32(ir0 + IR_IMAN);
        self.regs.write32(ir0 + IR_IMAN, iman | IMAN_IE);

        log_debug!(
            "xHCI: event ring base={:#x} erst={:#x} ({} TRBs)",
            self.event_ring.phys_base(),
            self.event_ring.erst_phys_base(),
            EVENT_RING_TRBS
        );
    }

    fn is_usb3_port(&self, port: u8) -> bool {
        self.usb3_ports.contains(&port)
    }

    /// Reset every root port, then enumerate the ones with a device present.
    fn reset_all_ports(&mut self) {
        for port in 0..self.caps.max_ports {
            let usb3 = self.is_usb3_port(port);
            if reset_port(&mut self.regs, self.op, port, usb3) {
                log_info!(
                    "xHCI: reset {} port {} ok",
                    if usb3 { "USB3" } else { "USB2" },
                    port
                );
                let portsc = self.regs.read32(portsc_offset(self.op, port));
                if portsc & PORTSC_CCS != 0 {
                    let speed = ((portsc >> PORTSC_SPEED_SHIFT) & 0xF) as u8;
                    if let Err(err) = self.enumerate_device(port, speed) {
                        log_warn!("xHCI: port {} enumeration failed: {:?}", port, err);
                    }
                }
            } else {
                log_warn!(
                    "xHCI: reset {} port {} failed",
                    if usb3 { "USB3" } else { "USB2" },
                    port
                );
            }
        }
    }

    /// Ring a doorbell. The fence makes every ring write visible before the
    /// controller is told to look.
    fn ring_doorbell(&mut self, slot: u8, target: u32) {
        fence(Ordering::SeqCst);
        self.regs.write32(self.db + 4 * slot as u64, target);
    }

    /// Enqueue a command TRB and wait for its Command Completion Event.
    /// Returns (completion code, slot id). The code is returned verbatim
    /// when it is not SUCCESS.
    fn run_command(&mut self, parameter: u64, status: u32, control: u32) -> Result<(u32, u8), XhciError> {
        let key = self.command_ring.enqueue(parameter, status, control);
        if !self.waiters.register(key) {
            return Err(XhciError::NoFreeSlot);
        }
        self.ring_doorbell(0, 0);

        let mut waited = 0;
        loop {
            self.process_events();
            if let Some((code, slot_id)) = self.waiters.take(key) {
                if code != COMPLETION_SUCCESS {
                    return Err(XhciError::Completion(code));
                }
                return Ok((code, slot_id));
            }
            waited += 1;
            if waited >= COMMAND_TIMEOUT_MS {
                self.waiters.cancel(key);
                return Err(XhciError::CommandTimeout);
            }
            sleep_ms(1);
        }
    }

    /// Enumerate the device behind `port` (zero-based) at `speed`.
    ///
    /// Enable Slot, hang a fresh device context off the DCBAA, build the
    /// control transfer ring and input context, Address Device with BSR=1,
    /// read the first 8 descriptor bytes, patch the real max packet size,
    /// and Address Device again with BSR=0.
    fn enumerate_device(&mut self, port: u8, speed: u8) -> Result<u8, XhciError> {
        let (_, slot_id) =
            self.run_command(0, 0, trb::trb_type(trb::TRB_TYPE_ENABLE_SLOT))?;
        if slot_id == 0 || slot_id > self.caps.max_slots {
            return Err(XhciError::ProtocolError);
        }
        log_info!("xHCI: port {} assigned slot {}", port, slot_id);

        let context_size = self.caps.context_size();
        let device_context = DeviceContext::allocate(context_size)?;
        self.dcbaa.set_entry(slot_id, device_context.phys_addr());

        let control_ring = ProducerRing::allocate(COMMAND_RING_TRBS)?;
        let max_packet_size = default_max_packet_size(speed);

        let mut input_context = InputContext::allocate(context_size)?;
        input_context.set_add_flags(ADD_SLOT_AND_EP0);
        // Root-hub port numbers are 1-based in the slot context.
        input_context.set_slot_context(speed, port + 1, 1, 0);
        input_context.set_control_endpoint(
            max_packet_size,
            control_ring.phys_base(),
            control_ring.cycle_state(),
            8,
        );

        let mut device = DeviceSlot {
            slot_id,
            port,
            speed,
            device_context,
            input_context,
            control_ring,
            max_packet_size,
            addressed: false,
        };

        // First pass with BSR=1: no SET_ADDRESS goes out on the wire.
        self.address_device(&device, true)?;

        let mut descriptor8 = [0u8; 8];
        self.read_device_descriptor8(&mut device, &mut descriptor8)?;
        // bMaxPacketSize0 for SuperSpeed is an exponent.
        let mps = if device.speed >= regs::SPEED_SUPER {
            1u16 << descriptor8[7]
        } else {
            descriptor8[7] as u16
        };
        if mps != 0 && mps != device.max_packet_size {
            log_debug!(
                "xHCI: slot {} max packet size {} -> {}",
                device.slot_id,
                device.max_packet_size,
                mps
            );
            device.max_packet_size = mps;
            device.input_context.update_max_packet_size(mps);
        }

        // Second pass with BSR=0 moves the device to Addressed.
        self.address_device(&device, false)?;
        device.addressed = true;
        log_info!("xHCI: slot {} addressed (port {})", device.slot_id, device.port);

        let slot = device.slot_id;
        self.devices.push(device);
        Ok(slot)
    }

    fn address_device(&mut self, device: &DeviceSlot, bsr: bool) -> Result<(), XhciError> {
        let mut control =
            trb::trb_type(trb::TRB_TYPE_ADDRESS_DEVICE) | ((device.slot_id as u32) << 24);
        if bsr {
            control |= trb::TRB_BSR;
        }
        self.run_command(device.input_context.phys_addr(), 0, control)
            .map(|_| ())
    }

    /// Read the first 8 bytes of the device descriptor through a three-TRB
    /// control transfer: Setup (IDT, TRT=IN), Data (IN, chained), Event Data
    /// (IOC) carrying the completion tag.
    fn read_device_descriptor8(
        &mut self,
        device: &mut DeviceSlot,
        out: &mut [u8; 8],
    ) -> Result<(), XhciError> {
        let buffer = memory::DmaBuffer::allocate(8, 64)?;

        // GET_DESCRIPTOR(DEVICE, len=8), immediate setup data.
        let setup: u64 = u64::from_le_bytes([0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x08, 0x00]);
        let tag = buffer.phys_addr();

        device.control_ring.enqueue(
            setup,
            8,
            trb::trb_type(trb::TRB_TYPE_SETUP_STAGE) | trb::TRB_IDT | trb::TRB_TRT_IN,
        );
        device.control_ring.enqueue(
            buffer.phys_addr(),
            8,
            trb::trb_type(trb::TRB_TYPE_DATA_STAGE)
                | trb::TRB_DIR_IN
                | trb::TRB_CHAIN
                | trb::TRB_ENT,
        );
        device.control_ring.enqueue(
            tag,
            0,
            trb::trb_type(trb::TRB_TYPE_EVENT_DATA) | trb::TRB_IOC,
        );

        self.pending_transfer = Some((tag, None));
        self.ring_doorbell(device.slot_id, 1);

        let mut waited = 0;
        let result = loop {
            self.process_events();
            if let Some((_, Some((code, _residual)))) = self.pending_transfer {
                break Ok(code);
            }
            waited += 1;
            if waited >= TRANSFER_TIMEOUT_MS {
                break Err(XhciError::TransferTimeout);
            }
            sleep_ms(1);
        };
        self.pending_transfer = None;

        let code = result?;
        if code != COMPLETION_SUCCESS {
            return Err(XhciError::Completion(code));
        }

        let src = buffer.virt_addr() as *const u8;
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = unsafe { core::ptr::read_volatile(src.add(i)) };
        }
        Ok(())
    }

    /// Drain the event ring, dispatch each event, then acknowledge the
    /// dequeue pointer and the interrupt-pending bits (all RW1C: write the
    /// one bit, nothing else).
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.event_ring.dequeue() {
            self.handle_event(event);
            handled += 1;
        }
        if handled > 0 {
            let ir0 = self.rt + RT_IR_BASE;
            self.regs
                .write64(ir0 + IR_ERDP, self.event_ring.dequeue_pointer() | ERDP_EHB);
            // IMAN.IP and USBSTS.EINT are RW1C: write the one bit itself,
            // never a complemented mask.
            self.regs.write32(ir0 + IR_IMAN, IMAN_IP | IMAN_IE);
            self.regs.write32(self.op + OP_USBSTS, USBSTS_EINT);
        }

        let status = self.regs.read32(self.op + OP_USBSTS);
        if status & (USBSTS_HCE | USBSTS_HSE) != 0 {
            log_warn!("xHCI: controller error state, USBSTS={:#x}", status);
        }
        handled
    }

    fn handle_event(&mut self, event: Trb) {
        match event.trb_type() {
            trb::TRB_TYPE_COMMAND_COMPLETION => {
                self.waiters
                    .complete(event.parameter & !0xF, event.completion_code(), event.slot_id());
            }
            trb::TRB_TYPE_PORT_STATUS_CHANGE => {
                // Port ids in events are 1-based.
                let port = event.port_id().wrapping_sub(1);
                self.handle_port_change(port);
            }
            trb::TRB_TYPE_TRANSFER_EVENT => {
                let code = event.completion_code();
                let residual = event.transfer_residual();
                if let Some((tag, result)) = self.pending_transfer.as_mut() {
                    if event.parameter == *tag {
                        *result = Some((code, residual));
                    }
                }
            }
            trb::TRB_TYPE_HOST_CONTROLLER_EVENT => {
                log_warn!(
                    "xHCI: host controller event, completion code {}",
                    event.completion_code()
                );
            }
            other => {
                log_debug!("xHCI: unexpected event TRB type {:#x}", other);
            }
        }
    }

    /// Connect/disconnect handling for a Port Status Change Event, followed
    /// by acknowledgment of every asserted RW1C change bit in PORTSC.
    fn handle_port_change(&mut self, port: u8) {
        if port >= self.caps.max_ports {
            return;
        }
        let portsc_off = portsc_offset(self.op, port);
        let portsc = self.regs.read32(portsc_off);

        if portsc & PORTSC_CSC != 0 {
            if portsc & PORTSC_CCS != 0 {
                log_info!("xHCI: device connected on port {}", port);
                let usb3 = self.is_usb3_port(port);
                if reset_port(&mut self.regs, self.op, port, usb3) {
                    let speed =
                        ((self.regs.read32(portsc_off) >> PORTSC_SPEED_SHIFT) & 0xF) as u8;
                    if let Err(err) = self.enumerate_device(port, speed) {
                        log_warn!("xHCI: port {} enumeration failed: {:?}", port, err);
                    }
                }
            } else {
                log_info!("xHCI: device disconnected from port {}", port);
                self.devices.retain(|d| d.port != port);
            }
        }

        let changes = self.regs.read32(portsc_off) & PORTSC_CHANGE_BITS;
        if changes != 0 {
            let base = portsc_preserve(self.regs.read32(portsc_off));
            self.regs.write32(portsc_off, base | changes);
        }
    }

    /// Number of devices currently in the Addressed state.
    pub fn addressed_devices(&self) -> usize {
        self.devices.iter().filter(|d| d.addressed).count()
    }

    /// DCBAA entry for `slot_id` (device-context physical pointer).
    pub fn dcbaa_entry(&self, slot_id: u8) -> u64 {
        self.dcbaa.entry(slot_id)
    }

    /// Max packet size negotiated for the device on `slot_id`.
    pub fn device_max_packet_size(&self, slot_id: u8) -> Option<u16> {
        self.devices
            .iter()
            .find(|d| d.slot_id == slot_id)
            .map(|d| d.max_packet_size)
    }

    /// (input-context TR dequeue pointer, control ring base) for `slot_id`.
    pub fn device_control_ring(&self, slot_id: u8) -> Option<(u64, u64)> {
        self.devices.iter().find(|d| d.slot_id == slot_id).map(|d| {
            (
                d.input_context.control_endpoint_dequeue_ptr(),
                d.control_ring.phys_base(),
            )
        })
    }
}

/// Identity-map the controller window uncacheable.
fn map_controller_window(bar: u64) {
    let root = memory::current_top_level_table();
    let mut pfa = memory::frame_allocator().lock();
    let base = bar & !(PAGE_SIZE as u64 - 1);
    let mut offset = 0u64;
    while offset < MMIO_WINDOW as u64 {
        unsafe {
            memory::map_page(
                root,
                base + offset,
                base + offset,
                KERNEL_PAGE | CACHE_DISABLED,
                &mut *pfa,
            );
        }
        offset += PAGE_SIZE as u64;
    }
    drop(pfa);
    memory::flush_tlb_all();
}

static CONTROLLER: Mutex<Option<XhciDriver<MmioSpace>>> = Mutex::new(None);
static EVENT_PENDING: AtomicBool = AtomicBool::new(false);

/// Bring up the controller behind `bar` and register it as the global
/// instance.
pub fn init_controller(bar: u64) -> Result<(), XhciError> {
    let driver = XhciDriver::init(bar)?;
    *CONTROLLER.lock() = Some(driver);
    Ok(())
}

/// Called from the interrupt vector; the actual drain happens in
/// `poll_events` on the driver's own context.
pub fn note_interrupt() {
    EVENT_PENDING.store(true, Ordering::Release);
}

/// Drain pending controller events, if a controller is registered.
pub fn poll_events() {
    EVENT_PENDING.store(false, Ordering::Release);
    if let Some(driver) = CONTROLLER.lock().as_mut() {
        driver.process_events();
    }
}
