//! Transport for firmware commands: the command-queue entry (CQE-cmd) plus
//! chained mailbox pages, token/signature discipline, polling for
//! completion, and error decoding.

use std::time::Duration;

use nic_hal::{DmaAllocator, PhysicalAddress};

use crate::bits::{self, get_bits, phys_hi, phys_lo, set_bits};
use crate::clock::Clock;
use crate::error::{CommandStatus, Error, Result, TransportError};
use crate::init_segment::InitSegment;

const ENTRY_SIZE: usize = 0x40;
const OFF_TYPE: usize = 0x00;
const OFF_INPUT_LENGTH: usize = 0x04;
const OFF_INPUT_MAILBOX_PTR: usize = 0x08;
const OFF_INLINE_INPUT: usize = 0x10;
const OFF_INLINE_OUTPUT: usize = 0x20;
const OFF_OUTPUT_MAILBOX_PTR: usize = 0x30;
const OFF_OUTPUT_LENGTH: usize = 0x38;
const OFF_TOKEN_STATUS: usize = 0x3C;

const INLINE_WINDOW_LEN: usize = 0x10;
const MAILBOX_DATA_LEN: usize = 0x200;
const MAILBOX_ALLOC_SIZE: usize = 0x240;
const OFF_MB_NEXT_PTR: usize = 0x230;
const OFF_MB_BLOCK_NUMBER: usize = 0x238;
const OFF_MB_TOKEN: usize = 0x23C;

fn ceil_div(payload: usize, unit: usize) -> usize {
    if payload == 0 {
        0
    } else {
        (payload + unit - 1) / unit
    }
}

/// A host-allocated DMA page used as one link in an input or output mailbox
/// chain.
struct MailboxPage {
    buf: &'static mut [u8],
    phys: PhysicalAddress,
}

/// Transport for HCA commands: owns the CQE-cmd buffer and the preallocated
/// mailbox page pool, and implements `execute` exactly as the firmware
/// protocol demands.
pub struct CommandInterface<'a, C: Clock> {
    init_segment: InitSegment<'a>,
    entry: &'static mut [u8],
    input_mailboxes: Vec<MailboxPage>,
    output_mailboxes: Vec<MailboxPage>,
    token: u8,
    clock: C,
    verbose: bool,
}

impl<'a, C: Clock> CommandInterface<'a, C> {
    /// `mailbox_capacity` bounds the largest command this interface can
    /// carry: the capability query needs close to 4 KiB of output, which at
    /// 512 bytes of payload per page means 8 pages; callers sizing for the
    /// full driver should budget headroom beyond that.
    pub fn new<D: DmaAllocator>(
        mut init_segment: InitSegment<'a>,
        dma: &mut D,
        clock: C,
        mailbox_capacity: usize,
    ) -> Result<Self> {
        let (entry, entry_phys) = dma
            .alloc(ENTRY_SIZE, ENTRY_SIZE)
            .map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
        let mut input_mailboxes = Vec::with_capacity(mailbox_capacity);
        let mut output_mailboxes = Vec::with_capacity(mailbox_capacity);
        for _ in 0..mailbox_capacity {
            let (buf, phys) = dma
                .alloc(MAILBOX_ALLOC_SIZE, 4096)
                .map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
            input_mailboxes.push(MailboxPage { buf, phys });
            let (buf, phys) = dma
                .alloc(MAILBOX_ALLOC_SIZE, 4096)
                .map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
            output_mailboxes.push(MailboxPage { buf, phys });
        }

        init_segment.set_cmdq_phy_addr(entry_phys.as_u64());

        Ok(CommandInterface {
            init_segment,
            entry,
            input_mailboxes,
            output_mailboxes,
            token: 0,
            clock,
            verbose: false,
        })
    }

    /// Enables hexdumps of each entry and mailbox page on every exchange,
    /// useful when debugging a wire-format mismatch. Off by default.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// `false` until firmware has finished booting; bring-up polls this
    /// before issuing the first command.
    pub fn wait_ready(&self) -> bool {
        self.init_segment.ready()
    }

    /// Blocks (via the pluggable clock) until [`Self::wait_ready`] reports
    /// `true`.
    pub fn poll_until_ready(&mut self) {
        while !self.init_segment.ready() {
            self.clock.sleep(Duration::from_millis(10));
        }
    }

    fn next_token(&mut self) -> u8 {
        let next = if self.token == 0 || self.token >= 255 { 1 } else { self.token + 1 };
        self.token = next;
        next
    }

    fn prepare_chain(chain: &mut [MailboxPage], count: usize, token: u8) {
        for (i, page) in chain.iter_mut().take(count).enumerate() {
            page.buf.fill(0);
            bits::write_u32(page.buf, OFF_MB_BLOCK_NUMBER, i as u32);
            let token_word = set_bits(0, 23, 16, u32::from(token));
            bits::write_u32(page.buf, OFF_MB_TOKEN, token_word);
        }
        for i in 0..count.saturating_sub(1) {
            let next_phys = chain[i + 1].phys.as_u64();
            bits::write_u32(chain[i].buf, OFF_MB_NEXT_PTR, phys_hi(next_phys));
            bits::write_u32(chain[i].buf, OFF_MB_NEXT_PTR + 4, phys_lo(next_phys));
        }
    }

    /// Writes a 32-bit dword at a command's *logical* input offset: offsets
    /// below 16 land in the entry's inline window, larger offsets address
    /// the input mailbox chain at 512 bytes per page.
    pub fn write_input_u32(&mut self, logical_offset: usize, value: u32) {
        assert_eq!(logical_offset % 4, 0, "unaligned logical offset {logical_offset:#x}");
        if logical_offset < INLINE_WINDOW_LEN {
            bits::write_u32(self.entry, OFF_INLINE_INPUT + logical_offset, value);
        } else {
            let off = logical_offset - INLINE_WINDOW_LEN;
            let page = off / MAILBOX_DATA_LEN;
            let intra = off % MAILBOX_DATA_LEN;
            bits::write_u32(self.input_mailboxes[page].buf, intra, value);
        }
    }

    /// Reads a 32-bit dword at a command's logical output offset, mirroring
    /// [`write_input_u32`]'s placement rule.
    pub fn read_output_u32(&self, logical_offset: usize) -> u32 {
        assert_eq!(logical_offset % 4, 0, "unaligned logical offset {logical_offset:#x}");
        if logical_offset < INLINE_WINDOW_LEN {
            bits::read_u32(self.entry, OFF_INLINE_OUTPUT + logical_offset)
        } else {
            let off = logical_offset - INLINE_WINDOW_LEN;
            let page = off / MAILBOX_DATA_LEN;
            let intra = off % MAILBOX_DATA_LEN;
            bits::read_u32(self.output_mailboxes[page].buf, intra)
        }
    }

    /// Issues one firmware command and blocks (via the pluggable clock)
    /// until it completes or the device reports a health fault.
    ///
    /// `filler` writes the command's input fields via [`write_input_u32`];
    /// `reader` extracts the result via [`read_output_u32`] once the
    /// command has completed successfully.
    pub fn execute<F, R, T>(
        &mut self,
        opcode: u16,
        opmod: u16,
        in_len: usize,
        out_len: usize,
        filler: F,
        reader: R,
    ) -> Result<T>
    where
        F: FnOnce(&mut Self),
        R: FnOnce(&Self) -> T,
    {
        let token = self.next_token();

        let n_in = ceil_div(in_len.saturating_sub(INLINE_WINDOW_LEN), MAILBOX_DATA_LEN);
        let n_out = ceil_div(out_len.saturating_sub(INLINE_WINDOW_LEN), MAILBOX_DATA_LEN);
        if n_in > self.input_mailboxes.len() {
            return Err(Error::InputOverflow { requested: n_in, capacity: self.input_mailboxes.len() });
        }
        if n_out > self.output_mailboxes.len() {
            return Err(Error::OutputOverflow { requested: n_out, capacity: self.output_mailboxes.len() });
        }

        self.entry.fill(0);
        bits::write_u32(self.entry, OFF_TYPE, set_bits(0, 31, 24, 7));
        bits::write_u32(self.entry, OFF_INPUT_LENGTH, in_len as u32);
        bits::write_u32(self.entry, OFF_OUTPUT_LENGTH, out_len as u32);

        Self::prepare_chain(&mut self.input_mailboxes, n_in, token);
        Self::prepare_chain(&mut self.output_mailboxes, n_out, token);

        if n_in > 0 {
            let addr = self.input_mailboxes[0].phys.as_u64();
            bits::write_u32(self.entry, OFF_INPUT_MAILBOX_PTR, phys_hi(addr));
            bits::write_u32(self.entry, OFF_INPUT_MAILBOX_PTR + 4, phys_lo(addr));
        }
        if n_out > 0 {
            let addr = self.output_mailboxes[0].phys.as_u64();
            bits::write_u32(self.entry, OFF_OUTPUT_MAILBOX_PTR, phys_hi(addr));
            bits::write_u32(self.entry, OFF_OUTPUT_MAILBOX_PTR + 4, phys_lo(addr));
        }

        // opcode[31:16] | opmod[15:0], the conventional first input dword.
        self.write_input_u32(0, (u32::from(opcode) << 16) | u32::from(opmod));

        let mut header = set_bits(0, 31, 24, u32::from(token));
        header = set_bits(header, 0, 0, 1); // ownership = hardware
        bits::write_u32(self.entry, OFF_TOKEN_STATUS, header);

        filler(self);

        if self.verbose {
            self.dump_entry(opcode);
        }

        self.init_segment.ring_doorbell(0);

        loop {
            let header = bits::read_u32(self.entry, OFF_TOKEN_STATUS);
            if get_bits(header, 0, 0) == 0 {
                break;
            }
            let syndrome = self.init_segment.health_syndrome();
            if syndrome != 0 {
                return Err(Error::HcaHealth { opcode, code: syndrome });
            }
            self.clock.sleep(Duration::from_millis(10));
        }

        let header = bits::read_u32(self.entry, OFF_TOKEN_STATUS);
        let delivery_status = get_bits(header, 7, 1);
        if delivery_status != 0 {
            let source = TransportError::from_code(delivery_status).unwrap_or(TransportError::InternalError);
            return Err(Error::Transport { opcode, token, source });
        }

        let cmd_status = get_bits(self.read_output_u32(0x00), 31, 24);
        let syndrome = self.read_output_u32(0x04);
        if cmd_status != 0 {
            let source = CommandStatus::from_code(cmd_status).unwrap_or(CommandStatus::InternalErr);
            return Err(Error::Command { opcode, syndrome, source });
        }

        if self.verbose {
            self.dump_mailboxes(n_in, n_out);
        }

        Ok(reader(self))
    }

    fn dump_entry(&self, opcode: u16) {
        log::debug!("cmd {opcode:#06x} entry:\n{}", hexdump(self.entry));
    }

    fn dump_mailboxes(&self, n_in: usize, n_out: usize) {
        for (i, page) in self.input_mailboxes.iter().take(n_in).enumerate() {
            log::debug!("input mailbox[{i}]:\n{}", hexdump(page.buf));
        }
        for (i, page) in self.output_mailboxes.iter().take(n_out).enumerate() {
            log::debug!("output mailbox[{i}]:\n{}", hexdump(page.buf));
        }
    }
}

/// Formats `buf` as 16 bytes per line with an offset prefix, the way Linux's
/// mlx5_core debug dumps do, so a capture can be diffed byte-for-byte.
fn hexdump(buf: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in buf.chunks(16).enumerate() {
        out.push_str(&format!("{:04x}: ", i * 16));
        for byte in chunk {
            out.push_str(&format!("{byte:02x} "));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_div_matches_mailbox_chain_rule() {
        assert_eq!(ceil_div(0, 512), 0);
        assert_eq!(ceil_div(512, 512), 1);
        assert_eq!(ceil_div(513, 512), 2);
        assert_eq!(ceil_div(1024, 512), 2);
        assert_eq!(ceil_div(1025, 512), 3);
    }

    #[test]
    fn token_increments_by_one_mod_255_and_skips_zero() {
        let mut h = connectx4_testkit::Harness::new();
        let bar0 = h.pci.map_bar(0).unwrap();
        let init_segment = crate::init_segment::InitSegment::new(bar0);
        let mut cmd = CommandInterface::new(init_segment, &mut h.dma, h.clock, 1).unwrap();

        let t1 = cmd.next_token();
        let t2 = cmd.next_token();
        assert_eq!(t1, 1);
        assert_eq!(t2, 2);

        cmd.token = 255;
        assert_eq!(cmd.next_token(), 1, "token must wrap from 255 back to 1, never 0");
    }

    #[test]
    fn mailbox_chain_links_pages_with_matching_token_and_block_number() {
        let mut h = connectx4_testkit::Harness::new();
        let bar0 = h.pci.map_bar(0).unwrap();
        let init_segment = crate::init_segment::InitSegment::new(bar0);
        let mut cmd = CommandInterface::new(init_segment, &mut h.dma, h.clock, 4).unwrap();

        // 16 (inline) + 2 full pages + a partial third page: must chain
        // exactly 3 input mailboxes.
        let in_len = INLINE_WINDOW_LEN + MAILBOX_DATA_LEN * 2 + 100;
        cmd.execute(0x999, 0, in_len, 0, |_c| {}, |_| ()).expect("stub firmware accepts any opcode");

        let token = bits::get_bits(bits::read_u32(cmd.entry, OFF_TOKEN_STATUS), 31, 24) as u8;
        assert_ne!(token, 0);

        for (i, page) in cmd.input_mailboxes.iter().take(3).enumerate() {
            let page_token = bits::get_bits(bits::read_u32(page.buf, OFF_MB_TOKEN), 23, 16) as u8;
            assert_eq!(page_token, token, "mailbox {i} token must match the entry's token");
            assert_eq!(bits::read_u32(page.buf, OFF_MB_BLOCK_NUMBER), i as u32);
        }
        for i in 0..2 {
            let next_phys = cmd.input_mailboxes[i + 1].phys.as_u64();
            let hi = bits::read_u32(cmd.input_mailboxes[i].buf, OFF_MB_NEXT_PTR);
            let lo = bits::read_u32(cmd.input_mailboxes[i].buf, OFF_MB_NEXT_PTR + 4);
            assert_eq!((u64::from(hi) << 32) | u64::from(lo), next_phys, "mailbox {i}'s next_ptr must address mailbox {}", i + 1);
        }
    }

    #[test]
    fn access_register_paos_write_encodes_opcode_and_register_id() {
        let mut h = connectx4_testkit::Harness::new();
        let bar0 = h.pci.map_bar(0).unwrap();
        let init_segment = crate::init_segment::InitSegment::new(bar0);
        let mut cmd = CommandInterface::new(init_segment, &mut h.dma, h.clock, 1).unwrap();

        cmd.access_register_paos(true).expect("stub firmware accepts ACCESS_REGISTER");

        // opcode 0x805, opmod 0 (write) at the first inline input dword.
        let opcode_word = bits::read_u32(cmd.entry, OFF_INLINE_INPUT);
        assert_eq!(opcode_word.to_be_bytes(), [0x08, 0x05, 0x00, 0x00]);

        // register id 0x5006 (PAOS) at the next dword.
        let reg_word = bits::read_u32(cmd.entry, OFF_INLINE_INPUT + 0x04);
        assert_eq!(reg_word.to_be_bytes(), [0x50, 0x06, 0x00, 0x00]);
    }

    #[test]
    fn health_fault_mid_poll_fails_fast_without_completing_the_command() {
        let mut h = connectx4_testkit::Harness::new();
        let bar0 = h.pci.map_bar(0).unwrap();
        // Fault the device before any command is even issued: the very
        // first ownership check inside `execute` must see it and return,
        // never reaching a `clock.sleep` (so firmware, which never boots
        // in this test, never gets a chance to process anything).
        bits::write_u32(bar0, 0x1010, set_bits(0, 31, 24, 0xA5));
        let init_segment = crate::init_segment::InitSegment::new(bar0);
        let mut cmd = CommandInterface::new(init_segment, &mut h.dma, h.clock, 1).unwrap();

        let result = cmd.execute(0x999, 0, 16, 16, |_| {}, |_| ());
        assert!(matches!(result, Err(Error::HcaHealth { code: 0xA5, .. })));
        assert_eq!(h.firmware.borrow().trace.len(), 0, "the faulted command must never reach firmware");
    }
}
