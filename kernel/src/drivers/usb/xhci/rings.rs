//! TRB rings: the producer rings the driver feeds (command, transfer) and
//! the consumer ring the controller posts events onto.
//!
//! Producer discipline: every enqueue stamps the TRB with the producer cycle
//! state, writes it into the current slot, and advances. The last slot is
//! reserved for a LINK TRB pointing back at the ring base; reaching it wraps
//! the enqueue index to 0 and toggles the producer cycle. Consumer
//! discipline mirrors it: an event TRB is valid exactly when its cycle bit
//! equals the consumer cycle state, and the wrap at the segment end toggles
//! that state.

use crate::memory::dma::DmaBuffer;
use crate::memory::AllocResult;

use super::trb::{self, Trb, TRB_CYCLE, TRB_TOGGLE_CYCLE};

pub const TRB_SIZE: usize = 16;

/// Ring segments are 64-byte aligned and must not cross a 64 KiB boundary.
pub const RING_ALIGNMENT: usize = 64;

/// Producer-side TRB ring (command and transfer rings share the protocol).
pub struct ProducerRing {
    buffer: DmaBuffer,
    enqueue_index: usize,
    cycle: bool,
    trb_count: usize,
    link_index: usize,
}

impl ProducerRing {
    /// Allocate a ring with `trb_count` slots, the last reserved for the
    /// LINK TRB. The producer cycle state starts at 1.
    pub fn allocate(trb_count: usize) -> AllocResult<Self> {
        assert!(trb_count >= 2, "ring needs at least one TRB plus the link");
        let buffer = DmaBuffer::allocate(trb_count * TRB_SIZE, RING_ALIGNMENT)?;
        let mut ring = Self {
            buffer,
            enqueue_index: 0,
            cycle: true,
            trb_count,
            link_index: trb_count - 1,
        };
        // Seed the link slot; its cycle stays behind the producer cycle until
        // the first wrap stamps it.
        ring.write_link_trb(false);
        Ok(ring)
    }

    /// Physical base programmed into CRCR or an endpoint context.
    pub fn phys_base(&self) -> u64 {
        self.buffer.phys_addr()
    }

    /// Current producer cycle state.
    pub fn cycle_state(&self) -> bool {
        self.cycle
    }

    /// Current enqueue slot index.
    pub fn enqueue_index(&self) -> usize {
        self.enqueue_index
    }

    /// Slots available to payload TRBs (excludes the link slot).
    pub fn capacity(&self) -> usize {
        self.link_index
    }

    fn trb_ptr(&self, index: usize) -> *mut Trb {
        (self.buffer.virt_addr() + (index * TRB_SIZE) as u64) as *mut Trb
    }

    /// Read a slot back (tests and event correlation).
    pub fn trb_at(&self, index: usize) -> Trb {
        unsafe { core::ptr::read_volatile(self.trb_ptr(index)) }
    }

    fn write_trb(&mut self, index: usize, trb: Trb) {
        let ptr = self.trb_ptr(index) as *mut u32;
        unsafe {
            core::ptr::write_volatile(ptr, trb.parameter as u32);
            core::ptr::write_volatile(ptr.add(1), (trb.parameter >> 32) as u32);
            core::ptr::write_volatile(ptr.add(2), trb.status);
            // Control dword last: the cycle bit publishes the TRB.
            core::ptr::write_volatile(ptr.add(3), trb.control);
        }
    }

    fn write_link_trb(&mut self, stamp_cycle: bool) {
        let mut control = trb::trb_type(trb::TRB_TYPE_LINK) | TRB_TOGGLE_CYCLE;
        if stamp_cycle && self.cycle {
            control |= TRB_CYCLE;
        }
        let link = Trb::new(self.phys_base() & !0xF, 0, control);
        let index = self.link_index;
        self.write_trb(index, link);
    }

    /// Enqueue one TRB, stamping the producer cycle bit. Returns the
    /// physical address of the slot the TRB landed in (the key completion
    /// events carry back).
    pub fn enqueue(&mut self, parameter: u64, status: u32, control: u32) -> u64 {
        let index = self.enqueue_index;
        let mut stamped = control & !TRB_CYCLE;
        if self.cycle {
            stamped |= TRB_CYCLE;
        }
        self.write_trb(index, Trb::new(parameter, status, stamped));
        let trb_phys = self.phys_base() + (index * TRB_SIZE) as u64;

        self.enqueue_index += 1;
        if self.enqueue_index == self.link_index {
            // Publish the link with the old cycle so the consumer follows it,
            // then wrap and toggle.
            self.write_link_trb(true);
            self.enqueue_index = 0;
            self.cycle = !self.cycle;
        }
        trb_phys
    }
}

/// Consumer-side event ring plus its single-entry segment table.
pub struct EventRing {
    buffer: DmaBuffer,
    erst: DmaBuffer,
    dequeue_index: usize,
    cycle: bool,
    trb_count: usize,
}

/// One ERST entry: {base, size, reserved}.
const ERST_ENTRY_SIZE: usize = 16;

impl EventRing {
    /// Allocate the event ring segment and a one-entry ERST describing it.
    /// The consumer cycle state starts at 1 over a zeroed (cycle=0) ring.
    pub fn allocate(trb_count: usize) -> AllocResult<Self> {
        let buffer = DmaBuffer::allocate(trb_count * TRB_SIZE, RING_ALIGNMENT)?;
        let erst = DmaBuffer::allocate(ERST_ENTRY_SIZE, RING_ALIGNMENT)?;

        let entry = erst.virt_addr() as *mut u8;
        unsafe {
            core::ptr::write_volatile(entry as *mut u64, buffer.phys_addr());
            core::ptr::write_volatile(entry.add(8) as *mut u32, trb_count as u32);
            core::ptr::write_volatile(entry.add(12) as *mut u32, 0);
        }

        Ok(Self {
            buffer,
            erst,
            dequeue_index: 0,
            cycle: true,
            trb_count,
        })
    }

    /// Physical base of the ring segment.
    pub fn phys_base(&self) -> u64 {
        self.buffer.phys_addr()
    }

    /// Physical base of the segment table.
    pub fn erst_phys_base(&self) -> u64 {
        self.erst.phys_addr()
    }

    /// Number of TRB slots in the segment.
    pub fn segment_size(&self) -> usize {
        self.trb_count
    }

    /// Current consumer cycle state.
    pub fn cycle_state(&self) -> bool {
        self.cycle
    }

    /// Current dequeue slot index.
    pub fn dequeue_index(&self) -> usize {
        self.dequeue_index
    }

    /// Physical address the ERDP register should point at.
    pub fn dequeue_pointer(&self) -> u64 {
        self.buffer.phys_addr() + (self.dequeue_index * TRB_SIZE) as u64
    }

    fn trb_ptr(&self, index: usize) -> *const Trb {
        (self.buffer.virt_addr() + (index * TRB_SIZE) as u64) as *const Trb
    }

    /// Pop the next event if the controller has published one: valid iff the
    /// TRB's cycle bit equals the consumer cycle state. The wrap at the
    /// segment end toggles the state.
    pub fn dequeue(&mut self) -> Option<Trb> {
        let trb = unsafe { core::ptr::read_volatile(self.trb_ptr(self.dequeue_index)) };
        if trb.cycle() != self.cycle {
            return None;
        }
        self.dequeue_index += 1;
        if self.dequeue_index >= self.trb_count {
            self.dequeue_index = 0;
            self.cycle = !self.cycle;
        }
        Some(trb)
    }
}
