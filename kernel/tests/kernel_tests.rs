//! Directed invariant tests for the core kernel subsystems.
//!
//! Runs as a freestanding QEMU binary linked against the kernel library. The
//! global heap is backed by a static arena so every allocator-dependent path
//! (rings, contexts, the mock controller) works without a loader handoff.
//! Results go to the QEMU debug port; the exit code comes from
//! isa-debug-exit.

#![no_std]
#![no_main]

extern crate alloc;
extern crate nimbus_kernel;

use nimbus_kernel::drivers::usb::xhci::{
    regs::RegisterSpace, reset_host_controller, reset_port, rings::EventRing,
    rings::ProducerRing, trb, XhciDriver, XhciError,
};
use nimbus_kernel::logging::ring::CircularBuffer;
use nimbus_kernel::memory::heap::{kernel_heap, KernelHeap};
use nimbus_kernel::task::{Pcb, ProcessState, RoundRobinScheduler};
use nimbus_shared::{qemu_exit_ok, qemu_print, qemu_println};

/// Page-aligned backing store for heaps used in tests.
#[repr(C, align(4096))]
struct Arena<const N: usize>([u8; N]);

static mut GLOBAL_ARENA: Arena<{ 2 * 1024 * 1024 }> = Arena([0; 2 * 1024 * 1024]);
static mut SMALL_ARENA_A: Arena<4096> = Arena([0; 4096]);
static mut SMALL_ARENA_B: Arena<4096> = Arena([0; 4096]);

fn check(name: &str, ok: bool) {
    qemu_print!(name);
    if ok {
        qemu_println!(" ... ok");
    } else {
        qemu_println!(" ... FAILED");
        nimbus_shared::qemu_exit_error!();
        loop {
            x86_64::instructions::hlt();
        }
    }
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    nimbus_kernel::logging::init();

    unsafe {
        let base = core::ptr::addr_of_mut!(GLOBAL_ARENA) as u64;
        kernel_heap().lock().init(base, 2 * 1024 * 1024);
    }

    qemu_println!("=== NimbusOS kernel invariant tests ===");

    test_heap_basic();
    test_heap_round_trip();
    test_heap_merge_idempotence();
    test_ring_buffer_wrap();
    test_ring_buffer_fullness();
    test_dmesg_drain();
    test_scheduler_rotation();
    test_scheduler_remove_unknown();
    test_xhci_command_ring_wrap();
    test_xhci_event_ring_cycle();
    test_xhci_reset_sequence();
    test_xhci_port_reset_failure();
    test_xhci_address_device();

    qemu_println!("all tests passed");
    qemu_exit_ok!();
    loop {
        x86_64::instructions::hlt();
    }
}

// ---------------------------------------------------------------------------
// Heap
// ---------------------------------------------------------------------------

fn test_heap_basic() {
    let mut heap = KernelHeap::empty();
    unsafe {
        heap.init(core::ptr::addr_of_mut!(SMALL_ARENA_A) as u64, 4096);
    }

    let p1 = heap.allocate(64);
    let p2 = heap.allocate(64);
    check("heap: allocations non-null", !p1.is_null() && !p2.is_null());
    check("heap: allocations distinct", p1 != p2);

    heap.free(p1);
    let p3 = heap.allocate(32);
    check("heap: first-fit reuses freed block", p3 == p1);
}

fn test_heap_round_trip() {
    let mut heap = KernelHeap::empty();
    unsafe {
        heap.init(core::ptr::addr_of_mut!(SMALL_ARENA_A) as u64, 4096);
    }

    let sizes = [64usize, 128, 32, 256, 16];
    let mut ptrs = [core::ptr::null_mut::<u8>(); 5];
    for (i, &size) in sizes.iter().enumerate() {
        ptrs[i] = heap.allocate(size);
        check("heap: round-trip allocation non-null", !ptrs[i].is_null());
    }
    // Pairwise distinct and non-overlapping.
    for i in 0..sizes.len() {
        for j in 0..sizes.len() {
            if i == j {
                continue;
            }
            let (a, alen) = (ptrs[i] as usize, sizes[i]);
            let b = ptrs[j] as usize;
            check("heap: blocks non-overlapping", b >= a + alen || b < a);
        }
    }
    for &ptr in ptrs.iter() {
        heap.free(ptr);
    }
    check("heap: fully merged after freeing all", heap.segment_count() == 1);
    let mut shape = [(0usize, false); 4];
    let entries = heap.shape(&mut shape);
    check(
        "heap: merged segment spans the whole region",
        entries == 1 && shape[0].0 == 4096 && shape[0].1,
    );
}

fn test_heap_merge_idempotence() {
    let mut shape_ab = [(0usize, false); 8];
    let mut shape_ba = [(0usize, false); 8];

    let count_ab = {
        let mut heap = KernelHeap::empty();
        unsafe {
            heap.init(core::ptr::addr_of_mut!(SMALL_ARENA_A) as u64, 4096);
        }
        let a = heap.allocate(64);
        let b = heap.allocate(64);
        let c = heap.allocate(64);
        heap.free(a);
        heap.free(b);
        let count = heap.shape(&mut shape_ab);
        heap.free(c);
        count
    };

    let count_ba = {
        let mut heap = KernelHeap::empty();
        unsafe {
            heap.init(core::ptr::addr_of_mut!(SMALL_ARENA_B) as u64, 4096);
        }
        let a = heap.allocate(64);
        let b = heap.allocate(64);
        let c = heap.allocate(64);
        heap.free(b);
        heap.free(a);
        let count = heap.shape(&mut shape_ba);
        heap.free(c);
        count
    };

    check(
        "heap: adjacent frees merge identically in either order",
        count_ab == count_ba && shape_ab[..count_ab] == shape_ba[..count_ba],
    );
}

// ---------------------------------------------------------------------------
// Circular buffer
// ---------------------------------------------------------------------------

fn ring_with_capacity(capacity: usize) -> CircularBuffer {
    let storage = alloc::vec![0u8; capacity].leak();
    CircularBuffer::new(storage)
}

fn test_ring_buffer_wrap() {
    let ring = ring_with_capacity(4);
    ring.write(b"ABCDE");

    let mut out = [0u8; 4];
    let read = ring.read(&mut out);
    check("ring: wrap keeps the newest bytes", read == 4 && &out == b"BCDE");
    check("ring: drained ring is empty", ring.is_empty());
}

fn test_ring_buffer_fullness() {
    let ring = ring_with_capacity(4);
    ring.write(b"abc");
    check("ring: not full below capacity", !ring.is_full());
    ring.write(b"d");
    check("ring: full at capacity", ring.is_full());

    let mut out = [0u8; 1];
    let read = ring.read(&mut out);
    check("ring: dequeue clears full", read == 1 && !ring.is_full());

    // Overwrite path: after writing more than capacity into an empty ring, a
    // read returns exactly the last `capacity` bytes in order.
    let ring = ring_with_capacity(4);
    ring.write(b"0123456789");
    let mut out = [0u8; 8];
    let read = ring.read(&mut out);
    check(
        "ring: overwrite discards oldest bytes",
        read == 4 && &out[..4] == b"6789",
    );
}

fn test_dmesg_drain() {
    nimbus_kernel::log_info!("dmesg drain marker");
    let mut buf = [0u8; 512];
    let count = nimbus_kernel::dmesg_read(&mut buf);
    check(
        "dmesg: drained bytes are NUL-terminated within the buffer",
        count > 0 && buf[count] == 0,
    );
    let drained = core::str::from_utf8(&buf[..count]).unwrap_or("");
    check(
        "dmesg: drained log contains the marker line",
        drained.contains("dmesg drain marker"),
    );
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

fn ready_task(pid: u64) -> Pcb {
    let mut pcb = Pcb::empty();
    pcb.pid = pid;
    pcb.state = ProcessState::Ready;
    pcb
}

fn running_count(sched: &mut RoundRobinScheduler) -> usize {
    let mut count = 0;
    for index in 0..nimbus_kernel::config::MAX_QUEUED_TASKS {
        if let Some(task) = sched.get_task(index) {
            if task.state == ProcessState::Running {
                count += 1;
            }
        }
    }
    count
}

fn test_scheduler_rotation() {
    let cpu = 0;
    let mut sched = RoundRobinScheduler::new();
    check("sched: inserts land in slots 0..3", sched.add_task(ready_task(1)) == Some(0));
    check("sched: second insert in slot 1", sched.add_task(ready_task(2)) == Some(1));
    check("sched: third insert in slot 2", sched.add_task(ready_task(3)) == Some(2));

    // First switch moves off the swapper onto slot 0.
    check("sched: first switch picks slot 0", sched.switch_to_next_task(cpu));
    check(
        "sched: slot 0 running",
        sched.current_task(cpu).map(|t| t.pid) == Some(1),
    );

    // Round-robin order 0 -> 1 -> 2 -> 0, old task becomes READY.
    check("sched: tick to slot 1", sched.switch_to_next_task(cpu));
    check(
        "sched: slot 1 running, slot 0 ready",
        sched.current_task(cpu).map(|t| t.pid) == Some(2)
            && sched.get_task(0).map(|t| t.state) == Some(ProcessState::Ready),
    );
    check("sched: tick to slot 2", sched.switch_to_next_task(cpu));
    check(
        "sched: slot 2 running",
        sched.current_task(cpu).map(|t| t.pid) == Some(3),
    );
    check("sched: tick wraps to slot 0", sched.switch_to_next_task(cpu));
    check(
        "sched: rotation wrapped",
        sched.current_task(cpu).map(|t| t.pid) == Some(1),
    );

    // Exclusivity: exactly one RUNNING PCB per CPU at any instant.
    check("sched: single running task", running_count(&mut sched) == 1);

    // Liveness: with k READY tasks every task runs within k ticks.
    let mut ran = [false; 3];
    for _ in 0..3 {
        if let Some(task) = sched.current_task(cpu) {
            ran[(task.pid - 1) as usize] = true;
        }
        sched.switch_to_next_task(cpu);
    }
    check("sched: every task ran within k ticks", ran.iter().all(|&r| r));

    // A single runnable task makes the tick a no-op.
    sched.remove_task(2);
    sched.remove_task(3);
    check("sched: tick is a no-op with one task", !sched.switch_to_next_task(cpu));
}

fn test_scheduler_remove_unknown() {
    let mut sched = RoundRobinScheduler::new();
    sched.add_task(ready_task(7));
    sched.remove_task(99);
    check("sched: removing unknown pid is a no-op", sched.task_count() == 1);
}

// ---------------------------------------------------------------------------
// xHCI rings
// ---------------------------------------------------------------------------

fn test_xhci_command_ring_wrap() {
    let mut ring = ProducerRing::allocate(256).expect("command ring allocation");
    check("xhci: producer cycle starts at 1", ring.cycle_state());

    for _ in 0..255 {
        ring.enqueue(0, 0, trb::trb_type(trb::TRB_TYPE_NOOP_COMMAND));
    }
    check(
        "xhci: 255th enqueue wraps to slot 0",
        ring.enqueue_index() == 0,
    );
    check("xhci: wrap toggled producer cycle", !ring.cycle_state());

    let link = ring.trb_at(255);
    check(
        "xhci: slot 255 is a LINK TRB back to the base",
        link.trb_type() == trb::TRB_TYPE_LINK
            && link.cycle()
            && link.parameter == ring.phys_base(),
    );
}

fn test_xhci_event_ring_cycle() {
    let mut ring = EventRing::allocate(256).expect("event ring allocation");
    check(
        "xhci: consumer cycle starts at 1 over a zeroed ring",
        ring.cycle_state() && ring.dequeue().is_none(),
    );

    // The "controller" posts 5 events with cycle=1.
    let slots = ring.phys_base() as *mut trb::Trb;
    for i in 0..5u64 {
        let event = trb::Trb::new(
            i,
            trb::COMPLETION_SUCCESS << 24,
            trb::trb_type(trb::TRB_TYPE_COMMAND_COMPLETION) | trb::TRB_CYCLE,
        );
        unsafe {
            core::ptr::write_volatile(slots.add(i as usize), event);
        }
    }

    for i in 0..5u64 {
        let event = ring.dequeue();
        check(
            "xhci: events dequeue in FIFO order",
            event.map(|e| e.parameter) == Some(i),
        );
    }
    check("xhci: ring drained after M events", ring.dequeue().is_none());
    check(
        "xhci: dequeue pointer lands on slot M",
        ring.dequeue_pointer() == ring.phys_base() + 5 * 16,
    );
}

// ---------------------------------------------------------------------------
// Mock host controller
// ---------------------------------------------------------------------------

const MOCK_OP: u64 = 0x40;
const MOCK_DB: u64 = 0x1000;
const MOCK_RT: u64 = 0x2000;

/// In-memory controller honoring the register semantics the driver relies
/// on: halt/reset transitions, RW1C change bits, command-ring consumption
/// with LINK following, and event posting with the producer cycle.
struct MockHc {
    usbcmd: u32,
    usbsts: u32,
    dnctrl: u32,
    crcr: u64,
    dcbaap: u64,
    config: u32,
    portsc: u32,
    iman: u32,
    imod: u32,
    erstsz: u32,
    erstba: u64,
    erdp: u64,
    // Command-ring consumer state.
    cmd_ptr: u64,
    cmd_cycle: bool,
    // Event-ring producer state.
    evt_base: u64,
    evt_size: u32,
    evt_index: u32,
    evt_cycle: bool,
    // Per-device state for the single emulated slot.
    ep0_dequeue: u64,
    ep0_cycle: bool,
    /// Never clear CNR (reset-timeout scenario).
    stuck_cnr: bool,
    /// Port power never latches (bad-reset scenario).
    pp_stuck_low: bool,
}

impl MockHc {
    fn new() -> Self {
        Self {
            usbcmd: 0,
            usbsts: 0x1, // HCH: controller halted out of reset
            dnctrl: 0,
            crcr: 0,
            dcbaap: 0,
            config: 0,
            // PP | CCS | high-speed (speed id 3)
            portsc: (1 << 9) | (1 << 0) | (3 << 10),
            iman: 0,
            imod: 0,
            erstsz: 0,
            erstba: 0,
            erdp: 0,
            cmd_ptr: 0,
            cmd_cycle: true,
            evt_base: 0,
            evt_size: 0,
            evt_index: 0,
            evt_cycle: true,
            ep0_dequeue: 0,
            ep0_cycle: true,
            stuck_cnr: false,
            pp_stuck_low: false,
        }
    }

    fn stuck_cnr() -> Self {
        let mut hc = Self::new();
        hc.stuck_cnr = true;
        hc.usbsts |= 1 << 11;
        hc
    }

    fn dead_port() -> Self {
        let mut hc = Self::new();
        hc.pp_stuck_low = true;
        hc.portsc &= !(1 << 9);
        hc
    }

    fn post_event(&mut self, mut event: trb::Trb) {
        if self.evt_base == 0 || self.evt_size == 0 {
            return;
        }
        if self.evt_cycle {
            event.control |= trb::TRB_CYCLE;
        } else {
            event.control &= !trb::TRB_CYCLE;
        }
        unsafe {
            core::ptr::write_volatile(
                (self.evt_base + self.evt_index as u64 * 16) as *mut trb::Trb,
                event,
            );
        }
        self.evt_index += 1;
        if self.evt_index >= self.evt_size {
            self.evt_index = 0;
            self.evt_cycle = !self.evt_cycle;
        }
        self.usbsts |= 1 << 3; // EINT
        self.iman |= 1; // IP
    }

    fn read_trb(addr: u64) -> trb::Trb {
        unsafe { core::ptr::read_volatile(addr as *const trb::Trb) }
    }

    fn consume_command_ring(&mut self) {
        loop {
            let trb_addr = self.cmd_ptr;
            let cmd = Self::read_trb(trb_addr);
            if cmd.cycle() != self.cmd_cycle {
                return;
            }
            match cmd.trb_type() {
                trb::TRB_TYPE_LINK => {
                    self.cmd_ptr = cmd.parameter & !0xF;
                    if cmd.control & trb::TRB_TOGGLE_CYCLE != 0 {
                        self.cmd_cycle = !self.cmd_cycle;
                    }
                    continue;
                }
                trb::TRB_TYPE_ENABLE_SLOT => {
                    self.post_completion(trb_addr, trb::COMPLETION_SUCCESS, 3);
                }
                trb::TRB_TYPE_ADDRESS_DEVICE => {
                    // Input context, CSZ=0: endpoint-0 context is the third
                    // 32-byte entry; dwords 2..3 hold the TR dequeue pointer.
                    let input_ctx = cmd.parameter & !0xF;
                    let dequeue =
                        unsafe { core::ptr::read_volatile((input_ctx + 64 + 8) as *const u64) };
                    self.ep0_dequeue = dequeue & !0xF;
                    self.ep0_cycle = dequeue & 1 != 0;
                    self.post_completion(trb_addr, trb::COMPLETION_SUCCESS, cmd.slot_id());
                }
                _ => {
                    self.post_completion(trb_addr, trb::COMPLETION_SUCCESS, 0);
                }
            }
            self.cmd_ptr += 16;
        }
    }

    fn post_completion(&mut self, command_addr: u64, code: u32, slot_id: u8) {
        self.post_event(trb::Trb::new(
            command_addr,
            code << 24,
            trb::trb_type(trb::TRB_TYPE_COMMAND_COMPLETION) | ((slot_id as u32) << 24),
        ));
    }

    fn consume_transfer_ring(&mut self, slot_id: u8) {
        loop {
            let trb_addr = self.ep0_dequeue;
            let transfer = Self::read_trb(trb_addr);
            if transfer.cycle() != self.ep0_cycle {
                return;
            }
            match transfer.trb_type() {
                trb::TRB_TYPE_LINK => {
                    self.ep0_dequeue = transfer.parameter & !0xF;
                    if transfer.control & trb::TRB_TOGGLE_CYCLE != 0 {
                        self.ep0_cycle = !self.ep0_cycle;
                    }
                    continue;
                }
                trb::TRB_TYPE_DATA_STAGE => {
                    // First 8 bytes of a device descriptor; bMaxPacketSize0
                    // matches the high-speed default.
                    let descriptor: [u8; 8] = [0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 64];
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            descriptor.as_ptr(),
                            transfer.parameter as *mut u8,
                            8,
                        );
                    }
                }
                trb::TRB_TYPE_EVENT_DATA => {
                    self.post_event(trb::Trb::new(
                        transfer.parameter,
                        trb::COMPLETION_SUCCESS << 24,
                        trb::trb_type(trb::TRB_TYPE_TRANSFER_EVENT)
                            | ((slot_id as u32) << 24)
                            | (1 << 16),
                    ));
                }
                _ => {}
            }
            self.ep0_dequeue += 16;
        }
    }

    fn write_portsc(&mut self, value: u32) {
        const PP: u32 = 1 << 9;
        const PR: u32 = 1 << 4;
        const WPR: u32 = 1u32 << 31;
        const PED: u32 = 1 << 1;
        const PRC: u32 = 1 << 21;
        const WRC: u32 = 1 << 19;
        const CHANGE: u32 = (1 << 17) | (1 << 18) | (1 << 19) | (1 << 20) | (1 << 21)
            | (1 << 22) | (1 << 23);

        if value & PP != 0 && !self.pp_stuck_low {
            self.portsc |= PP;
        }
        // RW1C acknowledgments clear the written change bits.
        self.portsc &= !(value & CHANGE);
        if value & PR != 0 {
            self.portsc |= PED | PRC;
        }
        if value & WPR != 0 {
            self.portsc |= PED | WRC | PRC;
        }
    }
}

impl RegisterSpace for MockHc {
    fn read32(&self, offset: u64) -> u32 {
        match offset {
            0x00 => 0x0110_0040, // CAPLENGTH=0x40, HCIVERSION=1.10
            0x04 => 8 | (1 << 8) | (1 << 24), // 8 slots, 1 interrupter, 1 port
            0x08 => 0,           // no scratchpads, single-segment ERST
            0x10 => 0,           // CSZ=0, no extended capabilities
            0x14 => MOCK_DB as u32,
            0x18 => MOCK_RT as u32,
            o if o == MOCK_OP => self.usbcmd,
            o if o == MOCK_OP + 0x04 => self.usbsts,
            o if o == MOCK_OP + 0x08 => 1, // 4 KiB controller page size
            o if o == MOCK_OP + 0x14 => self.dnctrl,
            o if o == MOCK_OP + 0x38 => self.config,
            o if o == MOCK_OP + 0x400 => self.portsc,
            o if o == MOCK_RT + 0x20 => self.iman,
            o if o == MOCK_RT + 0x24 => self.imod,
            o if o == MOCK_RT + 0x28 => self.erstsz,
            _ => 0,
        }
    }

    fn write32(&mut self, offset: u64, value: u32) {
        match offset {
            o if o == MOCK_OP => {
                const RUN_STOP: u32 = 1 << 0;
                const HCRESET: u32 = 1 << 1;
                const HCH: u32 = 1 << 0;
                if value & HCRESET != 0 {
                    self.usbcmd = 0;
                    self.dnctrl = 0;
                    self.crcr = 0;
                    self.dcbaap = 0;
                    self.config = 0;
                    self.usbsts = HCH;
                    if self.stuck_cnr {
                        self.usbsts |= 1 << 11;
                    }
                    return;
                }
                self.usbcmd = value;
                if value & RUN_STOP != 0 {
                    self.usbsts &= !HCH;
                } else {
                    self.usbsts |= HCH;
                }
            }
            o if o == MOCK_OP + 0x04 => {
                // RW1C status bits.
                self.usbsts &= !(value & (1 << 3));
            }
            o if o == MOCK_OP + 0x14 => self.dnctrl = value,
            o if o == MOCK_OP + 0x38 => self.config = value,
            o if o == MOCK_OP + 0x400 => self.write_portsc(value),
            o if o == MOCK_RT + 0x20 => {
                self.iman = (self.iman & !(value & 1)) | (value & 2);
            }
            o if o == MOCK_RT + 0x24 => self.imod = value,
            o if o == MOCK_RT + 0x28 => self.erstsz = value,
            o if o == MOCK_DB => self.consume_command_ring(),
            o if o > MOCK_DB && o < MOCK_DB + 0x100 => {
                let slot = ((o - MOCK_DB) / 4) as u8;
                if value == 1 {
                    self.consume_transfer_ring(slot);
                }
            }
            _ => {}
        }
    }

    fn read64(&self, offset: u64) -> u64 {
        match offset {
            o if o == MOCK_OP + 0x18 => self.crcr,
            o if o == MOCK_OP + 0x30 => self.dcbaap,
            o if o == MOCK_RT + 0x30 => self.erstba,
            o if o == MOCK_RT + 0x38 => self.erdp,
            _ => 0,
        }
    }

    fn write64(&mut self, offset: u64, value: u64) {
        match offset {
            o if o == MOCK_OP + 0x18 => {
                self.crcr = value;
                self.cmd_ptr = value & !0x3F;
                self.cmd_cycle = value & 1 != 0;
            }
            o if o == MOCK_OP + 0x30 => self.dcbaap = value,
            o if o == MOCK_RT + 0x30 => {
                self.erstba = value;
                // Latch the single ERST entry: {ring base, ring size}.
                unsafe {
                    self.evt_base = core::ptr::read_volatile(value as *const u64);
                    self.evt_size = core::ptr::read_volatile((value + 8) as *const u32);
                }
                self.evt_index = 0;
                self.evt_cycle = true;
            }
            o if o == MOCK_RT + 0x38 => self.erdp = value,
            _ => {}
        }
    }
}

fn test_xhci_reset_sequence() {
    let mut hc = MockHc::new();
    check(
        "xhci: spec-honoring mock passes controller reset",
        reset_host_controller(&mut hc, MOCK_OP).is_ok(),
    );

    let mut hc = MockHc::stuck_cnr();
    check(
        "xhci: stuck CNR times out after 100ms",
        reset_host_controller(&mut hc, MOCK_OP) == Err(XhciError::ResetTimeout),
    );
}

fn test_xhci_port_reset_failure() {
    let mut hc = MockHc::dead_port();
    check(
        "xhci: unpowerable port fails reset",
        !reset_port(&mut hc, MOCK_OP, 0, false),
    );
}

fn test_xhci_address_device() {
    let driver = XhciDriver::with_register_space(MockHc::new())
        .expect("mock controller bring-up");

    check(
        "xhci: enable-slot reply assigned slot 3",
        driver.dcbaa_entry(3) != 0,
    );
    check(
        "xhci: device reached the addressed state",
        driver.addressed_devices() == 1,
    );
    let (input_dequeue, ring_base) = driver
        .device_control_ring(3)
        .expect("slot 3 device state");
    check(
        "xhci: input context points at the control transfer ring",
        input_dequeue == ring_base,
    );
    check(
        "xhci: max packet size matches the high-speed table entry",
        driver.device_max_packet_size(3) == Some(64),
    );
}
