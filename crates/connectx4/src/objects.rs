//! Runtime representation of the HCA objects the bring-up sequence
//! creates: EQ, CQ, SQ, RQ, TIR, TIS, UAR, PD, TD, and flow-table handles.
//! Each value owns the DMA buffers the object's command returned pointers
//! into, plus whatever cursor the steady-state datapath needs.

use crate::descriptors::{Eqe, EQE_SIZE};

/// `RST(0)`, `RDY(1)`, `ERR(3)` — the only legal queue states, and the only
/// legal transitions between them (see [`crate::commands`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Rst = 0,
    Rdy = 1,
    Err = 3,
}

/// Handles that are bare firmware-assigned numbers with no further state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uar(pub u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionDomain(pub u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportDomain(pub u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tis(pub u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tir(pub u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTable {
    pub id: u32,
    pub table_type: crate::commands::FlowTableType,
}

/// Event Queue: firmware publishes asynchronous events (page requests,
/// port state changes) into this ring; `poll` walks it opportunistically.
/// Unknown event codes are logged and skipped — the datapath never fails
/// because of one.
pub struct Eq {
    pub eqn: u32,
    ring: &'static mut [u8],
    n: u32,
    cursor: u32,
}

impl Eq {
    /// `ring` must be `n * EQE_SIZE` bytes, `n` a power of two. Every EQE's
    /// owner bit is initialized to 1 (hardware) so an unposted ring never
    /// looks ready.
    pub fn new(eqn: u32, ring: &'static mut [u8], n: u32) -> Self {
        assert!(n.is_power_of_two());
        assert_eq!(ring.len(), n as usize * EQE_SIZE);
        for i in 0..n {
            let off = i as usize * EQE_SIZE;
            Eqe::init_owned_by_hardware(&mut ring[off..off + EQE_SIZE]);
        }
        Eq { eqn, ring, n, cursor: 0 }
    }

    /// Walks entries while `owner == 0 && event_type != 0xFF`, invoking
    /// `handler` with each event's type byte and advancing the cursor
    /// modulo `n`.
    pub fn poll<F: FnMut(u8)>(&mut self, mut handler: F) {
        loop {
            let off = crate::descriptors::cyclic_index(self.cursor, self.n) as usize * EQE_SIZE;
            let eqe = Eqe::decode(&self.ring[off..off + EQE_SIZE]);
            if eqe.owner_is_hardware || eqe.event_type == 0xFF {
                break;
            }
            handler(eqe.event_type);
            self.cursor = self.cursor.wrapping_add(1);
        }
    }
}

/// Completion Queue: firmware writes one CQE per finished WQE; `n` is
/// always a power of two. `log_cq_size` counts *entries*, so a depth of
/// 1024 gives 1024 entries of 64 B each, 64 KiB of ring in total.
pub struct Cq {
    pub cqn: u32,
    ring: &'static mut [u8],
    n: u32,
    cursor: u32,
}

impl Cq {
    pub fn new(cqn: u32, ring: &'static mut [u8], n: u32) -> Self {
        assert!(n.is_power_of_two());
        Cq { cqn, ring, n, cursor: 0 }
    }

    /// Reaps completions until the ring is empty (owner bit flipped back to
    /// hardware), calling `handler` with each CQE's byte count.
    pub fn reap<F: FnMut(u32)>(&mut self, mut handler: F) {
        use crate::descriptors::{Cqe, CQE_SIZE};
        loop {
            let off = crate::descriptors::cyclic_index(self.cursor, self.n) as usize * CQE_SIZE;
            let cqe = Cqe::decode(&self.ring[off..off + CQE_SIZE]);
            if cqe.owner_is_hardware {
                break;
            }
            handler(cqe.byte_count);
            self.cursor = self.cursor.wrapping_add(1);
        }
    }
}

/// Size of one UAR MMIO page, mapped out of the device's doorbell BAR.
pub const UAR_PAGE_SIZE: usize = 4096;

/// Offset of the send doorbell register within a UAR page: the device
/// re-reads the SQ's DMA doorbell record on this write, so ringing it only
/// needs to carry the queue number, not the producer index itself.
const SQ_DOORBELL_OFFSET: usize = 0x800;

/// MMIO view over one UAR page. Only the send doorbell register this
/// driver rings is modeled; the rest of the page (event-queue arming,
/// blue-flame write-combining regions) goes unused since steady state
/// never arms interrupts.
pub struct UarPage {
    mmio: crate::bits::DeviceMemory<'static>,
}

impl UarPage {
    pub fn new(mmio: &'static mut [u8]) -> Self {
        assert!(mmio.len() >= UAR_PAGE_SIZE, "UAR page must be at least {UAR_PAGE_SIZE:#x} bytes");
        UarPage { mmio: crate::bits::DeviceMemory::new(mmio) }
    }

    pub fn ring_sq_doorbell(&mut self, sqn: u32) {
        self.mmio.put_u32(SQ_DOORBELL_OFFSET, sqn);
    }
}

/// Send Queue: a cyclic ring of 64 B WQEs plus the 16 B doorbell record
/// shared with its paired RQ or owned solely, as chosen at creation, and
/// the UAR page its doorbell register lives on.
pub struct Sq {
    pub sqn: u32,
    ring: &'static mut [u8],
    doorbell: &'static mut [u8],
    uar: UarPage,
    n: u32,
    producer: u32,
}

impl Sq {
    pub fn new(sqn: u32, ring: &'static mut [u8], doorbell: &'static mut [u8], n: u32, uar: UarPage) -> Self {
        assert!(n.is_power_of_two());
        Sq { sqn, ring, doorbell, uar, n, producer: 0 }
    }

    pub fn n(&self) -> u32 {
        self.n
    }

    /// Writes one WQE at the current producer slot and advances it; the
    /// caller is responsible for updating the doorbell record and ringing
    /// the UAR doorbell once it has posted as many WQEs as it intends to in
    /// one batch.
    pub fn post(&mut self, encode: impl FnOnce(&mut [u8])) -> u32 {
        use crate::descriptors::WQE_SIZE;
        let slot = crate::descriptors::cyclic_index(self.producer, self.n) as usize;
        let off = slot * WQE_SIZE;
        encode(&mut self.ring[off..off + WQE_SIZE]);
        let index = self.producer;
        self.producer = self.producer.wrapping_add(1);
        index
    }

    pub fn update_doorbell_record(&mut self) {
        crate::bits::write_u32(self.doorbell, 0, self.producer);
    }

    /// Rings the SQ's UAR doorbell register, telling the device to re-read
    /// the doorbell record and fetch newly posted WQEs.
    pub fn ring_uar_doorbell(&mut self) {
        self.uar.ring_sq_doorbell(self.sqn);
    }
}

/// Receive Queue: a cyclic ring of 16 B WQEs (single-segment buffer
/// descriptors).
pub struct Rq {
    pub rqn: u32,
    ring: &'static mut [u8],
    doorbell: &'static mut [u8],
    n: u32,
    producer: u32,
}

impl Rq {
    pub fn new(rqn: u32, ring: &'static mut [u8], doorbell: &'static mut [u8], n: u32) -> Self {
        assert!(n.is_power_of_two());
        Rq { rqn, ring, doorbell, n, producer: 0 }
    }

    pub fn n(&self) -> u32 {
        self.n
    }

    pub fn post(&mut self, encode: impl FnOnce(&mut [u8])) -> u32 {
        use crate::descriptors::RX_WQE_SIZE;
        let slot = crate::descriptors::cyclic_index(self.producer, self.n) as usize;
        let off = slot * RX_WQE_SIZE;
        encode(&mut self.ring[off..off + RX_WQE_SIZE]);
        let index = self.producer;
        self.producer = self.producer.wrapping_add(1);
        index
    }

    pub fn update_doorbell_record(&mut self) {
        crate::bits::write_u32(self.doorbell, 0, self.producer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_index_matches_power_of_two_mask() {
        for log_n in 0u32..12 {
            let n = 1u32 << log_n;
            for p in [0u32, 1, n - 1, n, n + 1, 3 * n + 5] {
                assert_eq!(crate::descriptors::cyclic_index(p, n), p % n);
                assert_eq!(crate::descriptors::cyclic_index(p, n), p & (n - 1));
            }
        }
    }

    #[test]
    fn cyclic_index_after_n_wraps_matches_producer() {
        let n = 64u32;
        let producer = n * 7 + 13;
        let consumer = producer; // after exactly as many consumes as produces
        assert_eq!(
            crate::descriptors::cyclic_index(producer, n),
            crate::descriptors::cyclic_index(consumer, n)
        );
    }
}
