//! Device contexts, input contexts, the DCBAA, and scratchpad memory.
//!
//! Context structures are sequences of 32- or 64-byte sub-contexts (slot,
//! endpoint 0, endpoint N), the size selected by the capability CSZ bit.
//! Field encodings follow the xHCI register layout; only the fields this
//! driver programs get accessors.

use alloc::vec::Vec;

use crate::memory::dma::DmaBuffer;
use crate::memory::{AllocResult, PAGE_SIZE};

/// Contexts are 64-byte aligned and must not cross a 4 KiB boundary.
const CONTEXT_ALIGNMENT: usize = 64;
const CONTEXT_BOUNDARY: usize = 4096;

/// Device contexts cover the slot context plus 31 endpoint contexts; the
/// controller owns the memory and may write any of them.
const DEVICE_CONTEXT_ENTRIES: usize = 32;

/// Input contexts prepend the input control context.
const INPUT_CONTEXT_ENTRIES: usize = 33;

/// Endpoint type encoding for a bidirectional control endpoint.
const EP_TYPE_CONTROL: u32 = 4;

/// Input control context add flags: A0 (slot) and A1 (endpoint 0).
pub const ADD_SLOT_AND_EP0: u32 = 0b11;

/// Controller-owned output context for one device slot.
pub struct DeviceContext {
    buffer: DmaBuffer,
}

impl DeviceContext {
    pub fn allocate(context_size: usize) -> AllocResult<Self> {
        let buffer = DmaBuffer::allocate_with_boundary(
            DEVICE_CONTEXT_ENTRIES * context_size,
            CONTEXT_ALIGNMENT,
            CONTEXT_BOUNDARY,
        )?;
        Ok(Self { buffer })
    }

    pub fn phys_addr(&self) -> u64 {
        self.buffer.phys_addr()
    }
}

/// Driver-built input context handed to Address Device / Configure Endpoint.
pub struct InputContext {
    buffer: DmaBuffer,
    context_size: usize,
}

impl InputContext {
    pub fn allocate(context_size: usize) -> AllocResult<Self> {
        let buffer = DmaBuffer::allocate_with_boundary(
            INPUT_CONTEXT_ENTRIES * context_size,
            CONTEXT_ALIGNMENT,
            CONTEXT_BOUNDARY,
        )?;
        Ok(Self {
            buffer,
            context_size,
        })
    }

    pub fn phys_addr(&self) -> u64 {
        self.buffer.phys_addr()
    }

    fn dword_ptr(&self, context_index: usize, dword: usize) -> *mut u32 {
        (self.buffer.virt_addr()
            + (context_index * self.context_size) as u64
            + (dword * 4) as u64) as *mut u32
    }

    fn write_dword(&mut self, context_index: usize, dword: usize, value: u32) {
        unsafe {
            core::ptr::write_volatile(self.dword_ptr(context_index, dword), value);
        }
    }

    fn read_dword(&self, context_index: usize, dword: usize) -> u32 {
        unsafe { core::ptr::read_volatile(self.dword_ptr(context_index, dword)) }
    }

    /// Input control context: mark which contexts the command consumes.
    pub fn set_add_flags(&mut self, add_flags: u32) {
        self.write_dword(0, 0, 0); // drop flags
        self.write_dword(0, 1, add_flags);
    }

    /// Slot context (context index 1): speed, root-hub port (1-based),
    /// number of valid endpoint contexts, interrupter target.
    pub fn set_slot_context(
        &mut self,
        speed: u8,
        root_hub_port: u8,
        context_entries: u8,
        interrupter_target: u16,
    ) {
        let dword0 = ((speed as u32) << 20) | ((context_entries as u32) << 27);
        let dword1 = (root_hub_port as u32) << 16;
        let dword2 = (interrupter_target as u32) << 22;
        self.write_dword(1, 0, dword0);
        self.write_dword(1, 1, dword1);
        self.write_dword(1, 2, dword2);
    }

    /// Endpoint-0 context (context index 2): control endpoint with the given
    /// max packet size, error count 3, dequeue pointer with DCS.
    pub fn set_control_endpoint(
        &mut self,
        max_packet_size: u16,
        dequeue_ptr: u64,
        dequeue_cycle_state: bool,
        average_trb_length: u16,
    ) {
        let dword1 =
            (3u32 << 1) | (EP_TYPE_CONTROL << 3) | ((max_packet_size as u32) << 16);
        let dequeue = (dequeue_ptr & !0xF) | if dequeue_cycle_state { 1 } else { 0 };
        self.write_dword(2, 0, 0);
        self.write_dword(2, 1, dword1);
        self.write_dword(2, 2, dequeue as u32);
        self.write_dword(2, 3, (dequeue >> 32) as u32);
        self.write_dword(2, 4, average_trb_length as u32);
    }

    /// Patch only the max packet size after the descriptor read.
    pub fn update_max_packet_size(&mut self, max_packet_size: u16) {
        let dword1 = self.read_dword(2, 1) & 0x0000_FFFF;
        self.write_dword(2, 1, dword1 | ((max_packet_size as u32) << 16));
    }

    /// The control-endpoint dequeue pointer currently programmed (tests).
    pub fn control_endpoint_dequeue_ptr(&self) -> u64 {
        let lo = self.read_dword(2, 2) as u64;
        let hi = self.read_dword(2, 3) as u64;
        ((hi << 32) | lo) & !0xF
    }

    /// The control-endpoint max packet size currently programmed (tests).
    pub fn control_endpoint_max_packet_size(&self) -> u16 {
        (self.read_dword(2, 1) >> 16) as u16
    }
}

/// Device Context Base Address Array: slot-indexed pointers the controller
/// consults to find each device's context. Slot 0 optionally points at the
/// scratchpad pointer array.
pub struct DeviceContextBaseArray {
    buffer: DmaBuffer,
    scratchpad_array: Option<DmaBuffer>,
    scratchpads: Vec<DmaBuffer>,
}

impl DeviceContextBaseArray {
    /// Allocate the array for `max_slots` devices and, when the controller
    /// asks for scratchpads, the pointer array plus one page per buffer.
    pub fn allocate(max_slots: u8, scratchpad_count: u16) -> AllocResult<Self> {
        let entries = max_slots as usize + 1;
        let buffer = DmaBuffer::allocate_with_boundary(
            entries * core::mem::size_of::<u64>(),
            CONTEXT_ALIGNMENT,
            CONTEXT_BOUNDARY,
        )?;

        let mut dcbaa = Self {
            buffer,
            scratchpad_array: None,
            scratchpads: Vec::new(),
        };

        if scratchpad_count > 0 {
            let array = DmaBuffer::allocate_with_boundary(
                scratchpad_count as usize * core::mem::size_of::<u64>(),
                CONTEXT_ALIGNMENT,
                CONTEXT_BOUNDARY,
            )?;
            let mut pads = Vec::new();
            for index in 0..scratchpad_count as usize {
                let page = DmaBuffer::allocate_with_boundary(PAGE_SIZE, PAGE_SIZE, PAGE_SIZE * 16)?;
                unsafe {
                    core::ptr::write_volatile(
                        (array.virt_addr() as *mut u64).add(index),
                        page.phys_addr(),
                    );
                }
                pads.push(page);
            }
            dcbaa.set_entry(0, array.phys_addr());
            dcbaa.scratchpad_array = Some(array);
            dcbaa.scratchpads = pads;
        }

        Ok(dcbaa)
    }

    pub fn phys_addr(&self) -> u64 {
        self.buffer.phys_addr()
    }

    /// Point slot `slot_id` at a device context.
    pub fn set_entry(&mut self, slot_id: u8, context_phys: u64) {
        unsafe {
            core::ptr::write_volatile(
                (self.buffer.virt_addr() as *mut u64).add(slot_id as usize),
                context_phys,
            );
        }
    }

    pub fn entry(&self, slot_id: u8) -> u64 {
        unsafe {
            core::ptr::read_volatile((self.buffer.virt_addr() as *const u64).add(slot_id as usize))
        }
    }

    pub fn scratchpad_count(&self) -> usize {
        self.scratchpads.len()
    }
}
