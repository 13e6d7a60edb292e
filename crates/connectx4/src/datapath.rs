//! Steady-state receive/transmit datapath. No blocking, no internal
//! threads: `push`/`pull` are called cooperatively by the host's run loop
//! and each does a bounded amount of work per call.

use nic_hal::{DmaAllocator, Link, Packet, MAX_PACKET_LEN};

use crate::descriptors::{cyclic_index, encode_rx_wqe, encode_tx_wqe};
use crate::error::{Error, Result};
use crate::objects::{Cq, Rq, Sq};

/// A fixed pool of DMA-visible receive buffers, one per RQ slot. Buffers
/// are never freed or reallocated: a completed slot is copied out into a
/// [`Packet`] and immediately reposted with the same address.
pub struct RxRing {
    n: u32,
    buffers: Vec<&'static mut [u8]>,
    addrs: Vec<nic_hal::PhysicalAddress>,
    consumer: u32,
}

impl RxRing {
    pub fn new<D: DmaAllocator>(dma: &mut D, n: u32) -> Result<Self> {
        let mut buffers = Vec::with_capacity(n as usize);
        let mut addrs = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let (buf, phys) = dma
                .alloc(MAX_PACKET_LEN, 64)
                .map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
            buffers.push(buf);
            addrs.push(phys);
        }
        Ok(RxRing { n, buffers, addrs, consumer: 0 })
    }

    /// Posts every buffer in the pool once, filling the ring before the
    /// first doorbell ring.
    pub fn post_all(&mut self, rq: &mut Rq, lkey: u32) {
        for slot in 0..self.n {
            let addr = self.addrs[slot as usize].as_u64();
            let len = self.buffers[slot as usize].len() as u32;
            rq.post(|buf| encode_rx_wqe(buf, addr, lkey, len));
        }
        rq.update_doorbell_record();
    }

    /// Reaps every completed receive, hands each off to `link` as a
    /// [`Packet`], and immediately reposts the freed slot.
    pub fn reap_into<L: Link>(&mut self, cq: &mut Cq, rq: &mut Rq, lkey: u32, link: &mut L) {
        let mut byte_counts = Vec::new();
        cq.reap(|byte_count| byte_counts.push(byte_count));
        if byte_counts.is_empty() {
            return;
        }
        for byte_count in byte_counts {
            let slot = cyclic_index(self.consumer, self.n) as usize;
            let data = self.buffers[slot][..byte_count as usize].to_vec();
            let packet = Packet::new(data, byte_count.min(MAX_PACKET_LEN as u32) as u16);
            if let Err(_dropped) = link.transmit(packet) {
                log::warn!("rx link full, dropping received packet");
            }
            let addr = self.addrs[slot].as_u64();
            let len = self.buffers[slot].len() as u32;
            rq.post(|buf| encode_rx_wqe(buf, addr, lkey, len));
            self.consumer = self.consumer.wrapping_add(1);
        }
        rq.update_doorbell_record();
    }
}

/// A fixed pool of DMA-visible transmit buffers, one per SQ slot. Tracks
/// how many sends are outstanding so `drain_from` never posts into a slot
/// whose completion hasn't been reaped yet.
pub struct TxRing {
    n: u32,
    buffers: Vec<&'static mut [u8]>,
    addrs: Vec<nic_hal::PhysicalAddress>,
    posted: u32,
    completed: u32,
}

const ETHERNET_HEADER_LEN: usize = 14;
const SEND_OPCODE: u8 = 0x0A;

impl TxRing {
    pub fn new<D: DmaAllocator>(dma: &mut D, n: u32) -> Result<Self> {
        let mut buffers = Vec::with_capacity(n as usize);
        let mut addrs = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let (buf, phys) = dma
                .alloc(MAX_PACKET_LEN, 64)
                .map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
            buffers.push(buf);
            addrs.push(phys);
        }
        Ok(TxRing { n, buffers, addrs, posted: 0, completed: 0 })
    }

    /// Reaps completed sends, freeing their slots for reuse.
    pub fn reap(&mut self, cq: &mut Cq) {
        cq.reap(|_byte_count| self.completed = self.completed.wrapping_add(1));
    }

    /// Drains packets the host has queued for transmission, copying each
    /// into the next free slot and posting one send WQE per packet. Stops
    /// once the link is empty or every slot not yet reaped is in flight.
    /// If anything was posted, updates the doorbell record and rings the
    /// SQ's UAR doorbell register once for the whole batch.
    pub fn drain_from<L: Link>(&mut self, sq: &mut Sq, qpn: u32, lkey: u32, link: &mut L) {
        let mut drained = false;
        while self.posted.wrapping_sub(self.completed) < self.n {
            let Some(packet) = link.receive() else { break };
            let bytes = packet.as_bytes();
            let header_len = bytes.len().min(ETHERNET_HEADER_LEN);
            let (header, payload) = bytes.split_at(header_len);
            let slot = cyclic_index(self.posted, self.n) as usize;
            self.buffers[slot][..payload.len()].copy_from_slice(payload);
            let addr = self.addrs[slot].as_u64();
            sq.post(|buf| encode_tx_wqe(buf, SEND_OPCODE, qpn, header, addr, lkey, payload.len() as u32));
            self.posted = self.posted.wrapping_add(1);
            drained = true;
        }
        if drained {
            sq.update_doorbell_record();
            sq.ring_uar_doorbell();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nic_hal::{DmaAllocator as _, Link as _};

    #[test]
    fn rx_ring_reaps_completions_and_reposts_slots() {
        let mut h = connectx4_testkit::Harness::new();
        let n = 4u32;
        let mut rx_ring = RxRing::new(&mut h.dma, n).unwrap();
        let (rq_mem, _) = h.dma.alloc(n as usize * crate::descriptors::RX_WQE_SIZE, 16).unwrap();
        let (db_mem, _) = h.dma.alloc(16, 16).unwrap();
        let mut rq = Rq::new(7, rq_mem, db_mem, n);
        rx_ring.post_all(&mut rq, 0x55);

        let (cq_mem, _) = h.dma.alloc(n as usize * crate::descriptors::CQE_SIZE, 64).unwrap();
        for slot in 0..n as usize {
            let off = slot * crate::descriptors::CQE_SIZE;
            crate::bits::write_u32(&mut cq_mem[off..off + 64], 0x3C, crate::bits::set_bits(0, 0, 0, 1));
        }
        for (slot, len) in [(0usize, 64u32), (1usize, 128u32)] {
            let off = slot * crate::descriptors::CQE_SIZE;
            crate::bits::write_u32(&mut cq_mem[off..off + 64], 0x2C, len);
            crate::bits::write_u32(&mut cq_mem[off..off + 64], 0x3C, 0);
        }
        let mut cq = Cq::new(9, cq_mem, n);

        let mut link = connectx4_testkit::QueueLink::new(8);
        rx_ring.reap_into(&mut cq, &mut rq, 0x55, &mut link);

        assert_eq!(link.nreadable(), 2);
        let p0 = link.receive().unwrap();
        assert_eq!(p0.length, 64);
        let p1 = link.receive().unwrap();
        assert_eq!(p1.length, 128);
    }

    #[test]
    fn tx_ring_drains_queued_packets_onto_the_send_queue() {
        let mut h = connectx4_testkit::Harness::new();
        let n = 2u32;
        let mut tx_ring = TxRing::new(&mut h.dma, n).unwrap();
        let (sq_mem, _) = h.dma.alloc(n as usize * crate::descriptors::WQE_SIZE, 64).unwrap();
        let (db_mem, _) = h.dma.alloc(16, 16).unwrap();
        let doorbell_bar = h.pci.map_bar(2).unwrap();
        let uar_page_ptr = doorbell_bar.as_mut_ptr();
        let uar = crate::objects::UarPage::new(&mut doorbell_bar[0..crate::objects::UAR_PAGE_SIZE]);
        let mut sq = Sq::new(3, sq_mem, db_mem, n, uar);

        let mut link = connectx4_testkit::QueueLink::new(8);
        link.transmit(nic_hal::Packet::new(vec![0xAAu8; 20], 20)).unwrap();

        tx_ring.drain_from(&mut sq, 3, 0x55, &mut link);
        assert_eq!(link.nreadable(), 0);

        let uar_bytes = unsafe { std::slice::from_raw_parts(uar_page_ptr, crate::objects::UAR_PAGE_SIZE) };
        assert_eq!(crate::bits::read_u32(uar_bytes, 0x800), 3); // SQ doorbell rung with the queue number
    }

    #[test]
    fn tx_ring_backpressures_once_every_slot_is_in_flight() {
        let mut h = connectx4_testkit::Harness::new();
        let n = 1u32;
        let mut tx_ring = TxRing::new(&mut h.dma, n).unwrap();
        let (sq_mem, _) = h.dma.alloc(n as usize * crate::descriptors::WQE_SIZE, 64).unwrap();
        let (db_mem, _) = h.dma.alloc(16, 16).unwrap();
        let uar = h.uar_page(1);
        let mut sq = Sq::new(3, sq_mem, db_mem, n, uar);

        let mut link = connectx4_testkit::QueueLink::new(8);
        link.transmit(nic_hal::Packet::new(vec![0xAAu8; 20], 20)).unwrap();
        link.transmit(nic_hal::Packet::new(vec![0xBBu8; 20], 20)).unwrap();

        tx_ring.drain_from(&mut sq, 3, 0x55, &mut link);
        assert_eq!(link.nreadable(), 1);
    }
}
