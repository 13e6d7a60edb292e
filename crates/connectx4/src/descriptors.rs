//! WQE/CQE/EQE layouts and the cyclic ring-index arithmetic shared by every
//! work queue: producer and consumer counters are plain 32-bit counters,
//! `index mod size` is the only addressing rule, and wraparound is
//! transparent to callers.

use crate::bits::{get_bits, read_u32, set_bits, write_u32};

pub const EQE_SIZE: usize = 64;
pub const CQE_SIZE: usize = 64;
/// Send WQE stride (`log_wq_stride = 6`).
pub const WQE_SIZE: usize = 64;
/// Receive WQE stride (`log_wq_stride = 4`): a single-segment data pointer.
pub const RX_WQE_SIZE: usize = 16;

const OFF_OWNER_DWORD: usize = 0x3C;

/// Maps a producer or consumer counter to its ring slot. `n` must be a
/// power of two; `p & (n - 1)` is exactly `p % n`.
pub fn cyclic_index(p: u32, n: u32) -> u32 {
    debug_assert!(n.is_power_of_two());
    p & (n - 1)
}

/// A decoded event-queue entry.
#[derive(Debug, Clone, Copy)]
pub struct Eqe {
    pub owner_is_hardware: bool,
    pub event_type: u8,
}

impl Eqe {
    /// Sets only the owner bit to 1 (hardware); the rest of a freshly
    /// allocated EQE is left zeroed, matching firmware's own expectations
    /// for an as-yet-unpublished slot.
    pub fn init_owned_by_hardware(buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), EQE_SIZE);
        buf.fill(0);
        write_u32(buf, OFF_OWNER_DWORD, set_bits(0, 0, 0, 1));
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), EQE_SIZE);
        let owner_word = read_u32(buf, OFF_OWNER_DWORD);
        let type_word = read_u32(buf, 0x00);
        Eqe {
            owner_is_hardware: get_bits(owner_word, 0, 0) == 1,
            event_type: get_bits(type_word, 31, 24) as u8,
        }
    }
}

/// A decoded completion-queue entry.
#[derive(Debug, Clone, Copy)]
pub struct Cqe {
    pub owner_is_hardware: bool,
    pub byte_count: u32,
}

impl Cqe {
    pub fn decode(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), CQE_SIZE);
        let owner_word = read_u32(buf, OFF_OWNER_DWORD);
        Cqe {
            owner_is_hardware: get_bits(owner_word, 0, 0) == 1,
            byte_count: read_u32(buf, 0x2C),
        }
    }
}

/// Encodes a single-segment receive WQE: a fixed-MTU physical buffer the
/// device may fill.
pub fn encode_rx_wqe(buf: &mut [u8], addr: u64, lkey: u32, byte_count: u32) {
    debug_assert_eq!(buf.len(), RX_WQE_SIZE);
    write_u32(buf, 0x00, byte_count);
    write_u32(buf, 0x04, lkey);
    write_u32(buf, 0x08, crate::bits::phys_hi(addr));
    write_u32(buf, 0x0C, crate::bits::phys_lo(addr));
}

/// Encodes a send WQE: a control segment, an Ethernet segment carrying up
/// to `inline_header.len()` inlined bytes, and a single data-segment
/// pointer for the remainder of the packet.
pub fn encode_tx_wqe(
    buf: &mut [u8],
    opcode: u8,
    qpn: u32,
    inline_header: &[u8],
    addr: u64,
    lkey: u32,
    byte_count: u32,
) {
    debug_assert_eq!(buf.len(), WQE_SIZE);
    debug_assert!(inline_header.len() <= 16);
    buf.fill(0);
    write_u32(buf, 0x00, set_bits(0, 31, 24, u32::from(opcode)));
    write_u32(buf, 0x04, qpn & 0x00FF_FFFF);
    let inline_len = inline_header.len();
    write_u32(buf, 0x10, set_bits(0, 31, 16, inline_len as u32));
    buf[0x14..0x14 + inline_len].copy_from_slice(inline_header);
    write_u32(buf, 0x30, byte_count);
    write_u32(buf, 0x34, lkey);
    write_u32(buf, 0x38, crate::bits::phys_hi(addr));
    write_u32(buf, 0x3C, crate::bits::phys_lo(addr));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eqe_owner_starts_hardware() {
        let mut buf = [0u8; EQE_SIZE];
        Eqe::init_owned_by_hardware(&mut buf);
        let eqe = Eqe::decode(&buf);
        assert!(eqe.owner_is_hardware);
    }

    #[test]
    fn rx_wqe_round_trip() {
        let mut buf = [0u8; RX_WQE_SIZE];
        encode_rx_wqe(&mut buf, 0x1234_5678_9000, 0x1001, 2048);
        assert_eq!(read_u32(&buf, 0x00), 2048);
        assert_eq!(read_u32(&buf, 0x04), 0x1001);
        assert_eq!(read_u32(&buf, 0x08), 0x1234);
        assert_eq!(read_u32(&buf, 0x0C), 0x5678_9000);
    }
}
