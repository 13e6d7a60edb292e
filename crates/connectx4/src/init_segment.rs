//! Typed view over the fixed overlay at BAR offset 0: firmware revision,
//! command-queue base pointer, the command-queue doorbell, and the health
//! syndrome/ready bit the bring-up sequence polls.

use crate::bits::DeviceMemory;

const OFF_FW_REV: usize = 0x00;
const OFF_CMD_INTERFACE_REV: usize = 0x04;
const OFF_CMDQ_PHY_ADDR_HI: usize = 0x10;
const OFF_CMDQ_PHY_ADDR_LO: usize = 0x14;
const OFF_COMMAND_DOORBELL: usize = 0x18;
const OFF_INTERNAL_TIMER_HI: usize = 0x1000;
const OFF_CLEAR_INTERRUPT: usize = 0x100C;
const OFF_HEALTH_SYNDROME: usize = 0x1010;
const OFF_READY: usize = 0x1FC;

/// The device's firmware revision, split into major/minor halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareRevision {
    pub major: u16,
    pub minor: u16,
}

pub struct InitSegment<'a> {
    mem: DeviceMemory<'a>,
}

impl<'a> InitSegment<'a> {
    /// Wraps a freshly mapped BAR0. Does not touch the device; callers must
    /// still poll [`InitSegment::ready`] before issuing commands.
    pub fn new(bar: &'a mut [u8]) -> Self {
        InitSegment { mem: DeviceMemory::new(bar) }
    }

    pub fn fw_rev(&self) -> FirmwareRevision {
        let word = self.mem.get_u32(OFF_FW_REV);
        FirmwareRevision {
            minor: crate::bits::get_bits(word, 15, 0) as u16,
            major: crate::bits::get_bits(word, 31, 16) as u16,
        }
    }

    pub fn cmd_interface_rev(&self) -> u16 {
        crate::bits::get_bits(self.mem.get_u32(OFF_CMD_INTERFACE_REV), 31, 16) as u16
    }

    /// Writes the command queue's physical base address. The high dword is
    /// latched first; writing the low dword is what the device treats as
    /// "address committed", and it also resets `nic_interface` and the
    /// `log_cmdq_*` fields to zero as a side effect of that write.
    pub fn set_cmdq_phy_addr(&mut self, addr: u64) {
        self.mem.put_u32(OFF_CMDQ_PHY_ADDR_HI, crate::bits::phys_hi(addr));
        let lo = crate::bits::get_bits(crate::bits::phys_lo(addr), 31, 12) << 12;
        self.mem.put_u32(OFF_CMDQ_PHY_ADDR_LO, lo);
    }

    pub fn nic_interface(&self) -> u32 {
        crate::bits::get_bits(self.mem.get_u32(OFF_CMDQ_PHY_ADDR_LO), 9, 8)
    }

    pub fn log_cmdq_size(&self) -> u32 {
        crate::bits::get_bits(self.mem.get_u32(OFF_CMDQ_PHY_ADDR_LO), 7, 4)
    }

    pub fn log_cmdq_stride(&self) -> u32 {
        crate::bits::get_bits(self.mem.get_u32(OFF_CMDQ_PHY_ADDR_LO), 3, 0)
    }

    /// Rings bit `i` of the command-queue doorbell. Write-only trigger; the
    /// device never reports the doorbell's current value back.
    pub fn ring_doorbell(&mut self, i: u8) {
        assert!(i < 32);
        self.mem.put_u32(OFF_COMMAND_DOORBELL, 1u32 << i);
    }

    pub fn internal_timer(&self) -> u32 {
        self.mem.get_u32(OFF_INTERNAL_TIMER_HI)
    }

    pub fn clear_interrupt(&mut self) {
        let word = self.mem.get_u32(OFF_CLEAR_INTERRUPT);
        self.mem.put_u32(OFF_CLEAR_INTERRUPT, crate::bits::set_bits(word, 0, 0, 1));
    }

    /// Non-zero once the device has entered an unrecoverable health state.
    pub fn health_syndrome(&self) -> u8 {
        crate::bits::get_bits(self.mem.get_u32(OFF_HEALTH_SYNDROME), 31, 24) as u8
    }

    /// `false` means firmware is still initializing; bring-up must poll
    /// this until it reads `true` before issuing any command.
    pub fn ready(&self) -> bool {
        crate::bits::get_bits(self.mem.get_u32(OFF_READY), 31, 31) == 1
    }

    pub fn nic_interface_supported(&self) -> u32 {
        crate::bits::get_bits(self.mem.get_u32(OFF_READY), 26, 24)
    }

    /// Byte offset, from the start of BAR0, at which the command queue
    /// entry itself lives. Commands are issued against a fixed offset
    /// `0x1000` by convention of this driver; real hardware is indifferent
    /// as long as `cmdq_phy_addr` was programmed with the entry's physical
    /// address, which is tracked separately by [`crate::command_interface::CommandInterface`].
    pub fn raw(&self) -> &[u8] {
        self.mem.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_bit_is_msb_of_0x1fc() {
        let mut bar = vec![0u8; 0x200];
        let mut seg = InitSegment::new(&mut bar);
        assert!(!seg.ready());
        seg.mem.put_u32(OFF_READY, 1 << 31);
        assert!(seg.ready());
    }

    #[test]
    fn cmdq_phy_addr_write_order_and_masking() {
        let mut bar = vec![0u8; 0x200];
        let mut seg = InitSegment::new(&mut bar);
        seg.set_cmdq_phy_addr(0x1234_5678_9000);
        assert_eq!(seg.mem.get_u32(OFF_CMDQ_PHY_ADDR_HI), 0x1234);
        assert_eq!(seg.mem.get_u32(OFF_CMDQ_PHY_ADDR_LO), 0x5678_9000);
        assert_eq!(seg.nic_interface(), 0);
        assert_eq!(seg.log_cmdq_size(), 0);
        assert_eq!(seg.log_cmdq_stride(), 0);
    }
}
