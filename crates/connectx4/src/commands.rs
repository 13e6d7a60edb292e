//! One method per firmware opcode. Each is a thin shell over
//! [`CommandInterface::execute`]: pick an opcode, write arguments at their
//! logical offsets, run the command, and decode the result.

use nic_hal::PhysicalAddress;

use crate::bits::{get_bits, set_bits};
use crate::clock::Clock;
use crate::command_interface::CommandInterface;
use crate::error::{Error, Result};
use crate::objects::QueueState;

const OP_QUERY_HCA_CAP: u16 = 0x100;
const OP_INIT_HCA: u16 = 0x102;
const OP_TEARDOWN_HCA: u16 = 0x103;
const OP_ENABLE_HCA: u16 = 0x104;
const OP_DISABLE_HCA: u16 = 0x105;
const OP_QUERY_PAGES: u16 = 0x107;
const OP_MANAGE_PAGES: u16 = 0x108;
const OP_SET_ISSI: u16 = 0x10B;
const OP_QUERY_SPECIAL_CONTEXTS: u16 = 0x203;
const OP_CREATE_EQ: u16 = 0x301;
const OP_CREATE_CQ: u16 = 0x400;
const OP_ACCESS_REGISTER: u16 = 0x805;
const OP_ALLOC_PD: u16 = 0x800;
const OP_ALLOC_UAR: u16 = 0x802;
const OP_ALLOC_TRANSPORT_DOMAIN: u16 = 0x816;
const OP_CREATE_TIR: u16 = 0x900;
const OP_MODIFY_SQ: u16 = 0x905;
const OP_CREATE_SQ: u16 = 0x904;
const OP_MODIFY_RQ: u16 = 0x909;
const OP_CREATE_RQ: u16 = 0x908;
const OP_CREATE_TIS: u16 = 0x912;
const OP_SET_FLOW_TABLE_ROOT: u16 = 0x92F;
const OP_CREATE_FLOW_TABLE: u16 = 0x930;
const OP_CREATE_FLOW_GROUP: u16 = 0x933;
const OP_SET_FLOW_TABLE_ENTRY: u16 = 0x936;

const REG_PAOS: u16 = 0x5006;
const REG_PPLR: u16 = 0x5018;

/// Replaces the source's stringly-typed `"boot" | "init" | "regular"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Boot = 1,
    Init = 2,
    Regular = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapSet {
    Max = 0,
    Current = 1,
}

/// The subset of `QUERY_HCA_CAP`'s output the bring-up sequence depends on:
/// the maximum log2 depth permitted for each queue/object type this driver
/// creates exactly one of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HcaCaps {
    pub log_max_eq: u8,
    pub log_max_cq: u8,
    pub log_max_sq: u8,
    pub log_max_rq: u8,
    pub log_max_tir: u8,
    pub log_max_tis: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTableType {
    Rx = 0,
    Tx = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownMode {
    Graceful = 0,
    Panic = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAdminStatus {
    pub admin_up: bool,
    pub oper_up: bool,
}

impl<'a, C: Clock> CommandInterface<'a, C> {
    pub fn enable_hca(&mut self) -> Result<()> {
        self.execute(OP_ENABLE_HCA, 0, 0, 0, |_| {}, |_| ())
    }

    pub fn set_issi(&mut self, issi: u16) -> Result<()> {
        self.execute(
            OP_SET_ISSI,
            0,
            0x10,
            0,
            |c| c.write_input_u32(0x04, u32::from(issi)),
            |_| (),
        )
    }

    pub fn query_pages(&mut self, which: PageType) -> Result<i32> {
        self.execute(
            OP_QUERY_PAGES,
            which as u16,
            0,
            0x10,
            |_| {},
            |c| c.read_output_u32(0x04) as i32,
        )
    }

    /// Hands firmware `pages.len()` freshly allocated 4 KiB pages. Iterates
    /// `0..pages.len()` (exclusive) as the PRM requires, not `0..=len`.
    pub fn manage_pages_allocate(&mut self, pages: &[PhysicalAddress]) -> Result<()> {
        let in_len = 0x10 + pages.len() * 8;
        self.execute(
            OP_MANAGE_PAGES,
            1,
            in_len,
            0,
            |c| {
                c.write_input_u32(0x0C, pages.len() as u32);
                for (i, page) in pages.iter().enumerate() {
                    let addr = page.as_u64();
                    c.write_input_u32(0x10 + i * 8, crate::bits::phys_hi(addr));
                    c.write_input_u32(0x14 + i * 8, crate::bits::phys_lo(addr) & 0xFFFF_F000);
                }
            },
            |_| (),
        )
    }

    pub fn query_hca_cap(&mut self, which: CapSet) -> Result<HcaCaps> {
        self.execute(
            OP_QUERY_HCA_CAP,
            which as u16,
            0,
            0x40,
            |_| {},
            |c| HcaCaps {
                log_max_cq: get_bits(c.read_output_u32(0x10), 5, 0) as u8,
                log_max_eq: get_bits(c.read_output_u32(0x14), 5, 0) as u8,
                log_max_sq: get_bits(c.read_output_u32(0x18), 5, 0) as u8,
                log_max_rq: get_bits(c.read_output_u32(0x1C), 5, 0) as u8,
                log_max_tir: get_bits(c.read_output_u32(0x20), 5, 0) as u8,
                log_max_tis: get_bits(c.read_output_u32(0x24), 5, 0) as u8,
            },
        )
    }

    pub fn init_hca(&mut self) -> Result<()> {
        self.execute(OP_INIT_HCA, 0, 0x10, 0, |_| {}, |_| ())
    }

    pub fn alloc_uar(&mut self) -> Result<u32> {
        self.execute(
            OP_ALLOC_UAR,
            0,
            0x10,
            0x10,
            |_| {},
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    pub fn alloc_pd(&mut self) -> Result<u32> {
        self.execute(
            OP_ALLOC_PD,
            0,
            0x10,
            0x10,
            |_| {},
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    pub fn alloc_transport_domain(&mut self) -> Result<u32> {
        self.execute(
            OP_ALLOC_TRANSPORT_DOMAIN,
            0,
            0x10,
            0x10,
            |_| {},
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    pub fn query_special_contexts(&mut self) -> Result<u32> {
        self.execute(
            OP_QUERY_SPECIAL_CONTEXTS,
            0,
            0x10,
            0x10,
            |_| {},
            |c| c.read_output_u32(0x0C),
        )
    }

    /// Allocates 128 EQEs (`log_eq_size = 7`) over a single 4 KiB PAS page
    /// and requests only the PageRequest event (bit 0xB) at the event
    /// bitmask offset; the wider bitmask that would also catch port events
    /// is deliberately left unset.
    pub fn create_eq(&mut self, uar: u32, pas: PhysicalAddress) -> Result<u32> {
        const LOG_EQ_SIZE: u32 = 7;
        self.execute(
            OP_CREATE_EQ,
            0,
            0x110,
            0x10,
            |c| {
                c.write_input_u32(0x18, set_bits(0, 28, 24, LOG_EQ_SIZE));
                c.write_input_u32(0x1C, uar & 0x00FF_FFFF);
                c.write_input_u32(0x58, 1u32 << 0x0B);
                let addr = pas.as_u64();
                c.write_input_u32(0x100, crate::bits::phys_hi(addr));
                c.write_input_u32(0x104, crate::bits::phys_lo(addr));
            },
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    /// `log_cq_size = 10` (1 KiB of CQEs); `pas` and `doorbell` are
    /// host-allocated DMA addresses supplied by the caller.
    pub fn create_cq(&mut self, uar: u32, eqn: u32, pas: PhysicalAddress, doorbell: PhysicalAddress) -> Result<u32> {
        const LOG_CQ_SIZE: u32 = 10;
        self.execute(
            OP_CREATE_CQ,
            0,
            0x110,
            0x10,
            |c| {
                c.write_input_u32(0x10, eqn & 0x00FF_FFFF);
                c.write_input_u32(0x18, set_bits(0, 28, 24, LOG_CQ_SIZE));
                c.write_input_u32(0x1C, uar & 0x00FF_FFFF);
                let db = doorbell.as_u64();
                c.write_input_u32(0x38, crate::bits::phys_hi(db));
                c.write_input_u32(0x3C, crate::bits::phys_lo(db));
                let addr = pas.as_u64();
                c.write_input_u32(0x100, crate::bits::phys_hi(addr));
                c.write_input_u32(0x104, crate::bits::phys_lo(addr));
            },
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    pub fn create_tis(&mut self, prio: u8, td: u32) -> Result<u32> {
        self.execute(
            OP_CREATE_TIS,
            0,
            0x20,
            0x10,
            |c| {
                c.write_input_u32(0x04, set_bits(0, 3, 0, u32::from(prio)));
                c.write_input_u32(0x1C, td & 0x00FF_FFFF);
            },
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    pub fn create_tir_direct(&mut self, rqn: u32, td: u32) -> Result<u32> {
        self.execute(
            OP_CREATE_TIR,
            0,
            0x100,
            0x10,
            |c| {
                c.write_input_u32(0x1C, td & 0x00FF_FFFF);
                c.write_input_u32(0x24, rqn & 0x00FF_FFFF);
            },
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    /// `rlkey=1`, `fre=1`, `flush_in_error_en=1`, `min_wqe_inline_mode=1`,
    /// cyclic, `log_wq_stride=6` (64 B per WQE).
    pub fn create_sq(
        &mut self,
        cqn: u32,
        pd: u32,
        log_wq_size: u8,
        doorbell: PhysicalAddress,
        wqe_base: PhysicalAddress,
        tis: u32,
    ) -> Result<u32> {
        const WQ_TYPE_CYCLIC: u32 = 1;
        const LOG_WQ_STRIDE: u32 = 6;
        self.execute(
            OP_CREATE_SQ,
            0,
            0x200,
            0x10,
            |c| {
                c.write_input_u32(0x08, set_bits(0, 0, 0, 1)); // rlkey
                c.write_input_u32(0x0C, set_bits(0, 0, 0, 1)); // flush_in_error_en
                c.write_input_u32(0x10, set_bits(0, 20, 20, 1) | set_bits(0, 24, 24, 1)); // fre, min_wqe_inline_mode
                c.write_input_u32(0x18, cqn & 0x00FF_FFFF);
                c.write_input_u32(0x2C, tis & 0x00FF_FFFF);
                let wq_off = 0x30;
                c.write_input_u32(wq_off, set_bits(0, 31, 28, WQ_TYPE_CYCLIC));
                c.write_input_u32(wq_off + 0x04, pd & 0x00FF_FFFF);
                let db = doorbell.as_u64();
                c.write_input_u32(wq_off + 0x14, crate::bits::phys_hi(db));
                c.write_input_u32(wq_off + 0x18, crate::bits::phys_lo(db));
                c.write_input_u32(wq_off + 0x20, set_bits(0, 20, 16, LOG_WQ_STRIDE) | set_bits(0, 4, 0, u32::from(log_wq_size)));
                let base = wqe_base.as_u64();
                c.write_input_u32(wq_off + 0x110, crate::bits::phys_hi(base));
                c.write_input_u32(wq_off + 0x114, crate::bits::phys_lo(base));
            },
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    /// `rlkey=1`, `vlan_strip_disable=1`, cyclic, `log_wq_stride=4` (16 B
    /// per WQE).
    pub fn create_rq(
        &mut self,
        cqn: u32,
        pd: u32,
        log_wq_size: u8,
        doorbell: PhysicalAddress,
        wqe_base: PhysicalAddress,
    ) -> Result<u32> {
        const WQ_TYPE_CYCLIC: u32 = 1;
        const LOG_WQ_STRIDE: u32 = 4;
        self.execute(
            OP_CREATE_RQ,
            0,
            0x200,
            0x10,
            |c| {
                c.write_input_u32(0x08, set_bits(0, 0, 0, 1)); // rlkey
                c.write_input_u32(0x0C, set_bits(0, 12, 12, 1)); // vlan_strip_disable
                c.write_input_u32(0x18, cqn & 0x00FF_FFFF);
                let wq_off = 0x30;
                c.write_input_u32(wq_off, set_bits(0, 31, 28, WQ_TYPE_CYCLIC));
                c.write_input_u32(wq_off + 0x04, pd & 0x00FF_FFFF);
                let db = doorbell.as_u64();
                c.write_input_u32(wq_off + 0x14, crate::bits::phys_hi(db));
                c.write_input_u32(wq_off + 0x18, crate::bits::phys_lo(db));
                c.write_input_u32(wq_off + 0x20, set_bits(0, 20, 16, LOG_WQ_STRIDE) | set_bits(0, 4, 0, u32::from(log_wq_size)));
                let base = wqe_base.as_u64();
                c.write_input_u32(wq_off + 0x110, crate::bits::phys_hi(base));
                c.write_input_u32(wq_off + 0x114, crate::bits::phys_lo(base));
            },
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    pub fn modify_rq(&mut self, rqn: u32, curr: QueueState, next: QueueState) -> Result<()> {
        curr.validate_transition(next)?;
        self.execute(
            OP_MODIFY_RQ,
            0,
            0x20,
            0,
            |c| {
                c.write_input_u32(0x00, set_bits(0, 23, 20, next as u32));
                c.write_input_u32(0x04, rqn & 0x00FF_FFFF);
            },
            |_| (),
        )
    }

    pub fn modify_sq(&mut self, sqn: u32, curr: QueueState, next: QueueState) -> Result<()> {
        curr.validate_transition(next)?;
        self.execute(
            OP_MODIFY_SQ,
            0,
            0x20,
            0,
            |c| {
                c.write_input_u32(0x00, set_bits(0, 23, 20, next as u32));
                c.write_input_u32(0x04, sqn & 0x00FF_FFFF);
            },
            |_| (),
        )
    }

    pub fn create_flow_table(&mut self, table_type: FlowTableType, log_size: u8) -> Result<u32> {
        self.execute(
            OP_CREATE_FLOW_TABLE,
            0,
            0x30,
            0x10,
            move |c| {
                c.write_input_u32(0x04, set_bits(0, 23, 22, table_type as u32));
                c.write_input_u32(0x28, set_bits(0, 27, 24, u32::from(log_size)));
            },
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    pub fn set_flow_table_root(&mut self, table: u32, table_type: FlowTableType) -> Result<()> {
        self.execute(
            OP_SET_FLOW_TABLE_ROOT,
            0,
            0x30,
            0,
            move |c| {
                c.write_input_u32(0x04, set_bits(0, 23, 22, table_type as u32));
                c.write_input_u32(0x0C, table & 0x00FF_FFFF);
            },
            |_| (),
        )
    }

    /// `match_criteria_enable = 0` (matches nothing: the single wildcard
    /// group).
    pub fn create_flow_group_wildcard(&mut self, table: u32, table_type: FlowTableType, start: u32, end: u32) -> Result<u32> {
        self.execute(
            OP_CREATE_FLOW_GROUP,
            0,
            0x40,
            0x10,
            move |c| {
                c.write_input_u32(0x04, set_bits(0, 23, 22, table_type as u32));
                c.write_input_u32(0x0C, table & 0x00FF_FFFF);
                c.write_input_u32(0x1C, start);
                c.write_input_u32(0x20, end);
            },
            |c| get_bits(c.read_output_u32(0x08), 23, 0),
        )
    }

    /// action = FWD_DST(4), destination list of exactly one TIR.
    pub fn set_flow_table_entry_wildcard(
        &mut self,
        table: u32,
        table_type: FlowTableType,
        group: u32,
        index: u32,
        tir: u32,
    ) -> Result<()> {
        const ACTION_FWD_DST: u32 = 4;
        self.execute(
            OP_SET_FLOW_TABLE_ENTRY,
            0,
            0x110,
            0,
            move |c| {
                c.write_input_u32(0x04, set_bits(0, 23, 22, table_type as u32));
                c.write_input_u32(0x0C, table & 0x00FF_FFFF);
                c.write_input_u32(0x10, index);
                c.write_input_u32(0x40, group);
                c.write_input_u32(0x4C, ACTION_FWD_DST);
                c.write_input_u32(0x50, 1); // one destination
                c.write_input_u32(0x60, tir & 0x00FF_FFFF);
            },
            |_| (),
        )
    }

    /// `admin_up`: `true` programs `admin_status = 1` (up), `false`
    /// programs `2` (down); `ase = 1` always, since this is a write.
    pub fn access_register_paos(&mut self, admin_up: bool) -> Result<()> {
        let admin_status = if admin_up { 1 } else { 2 };
        self.execute(
            OP_ACCESS_REGISTER,
            0, // write
            0x20,
            0,
            move |c| {
                c.write_input_u32(0x04, set_bits(0, 31, 16, u32::from(REG_PAOS)));
                c.write_input_u32(0x0C, set_bits(0, 23, 16, 1)); // local_port = 1
                c.write_input_u32(0x10, set_bits(0, 31, 28, admin_status) | set_bits(0, 0, 0, 1));
            },
            |_| (),
        )
    }

    pub fn access_register_pplr_query(&mut self) -> Result<u32> {
        self.execute(
            OP_ACCESS_REGISTER,
            1, // read
            0x20,
            0x20,
            move |c| {
                c.write_input_u32(0x04, set_bits(0, 31, 16, u32::from(REG_PPLR)));
            },
            |c| c.read_output_u32(0x10),
        )
    }

    pub fn access_register_pplr_set(&mut self, loopback_mode: u8) -> Result<()> {
        self.execute(
            OP_ACCESS_REGISTER,
            0,
            0x20,
            0,
            move |c| {
                c.write_input_u32(0x04, set_bits(0, 31, 16, u32::from(REG_PPLR)));
                c.write_input_u32(0x10, set_bits(0, 7, 0, u32::from(loopback_mode)));
            },
            |_| (),
        )
    }

    pub fn teardown_hca(&mut self, mode: TeardownMode) -> Result<()> {
        self.execute(
            OP_TEARDOWN_HCA,
            0,
            0x10,
            0,
            move |c| c.write_input_u32(0x04, mode as u32),
            |_| (),
        )
    }

    pub fn disable_hca(&mut self) -> Result<()> {
        self.execute(OP_DISABLE_HCA, 0, 0, 0, |_| {}, |_| ())
    }
}

impl QueueState {
    pub(crate) fn validate_transition(self, next: QueueState) -> Result<()> {
        let legal = matches!(
            (self, next),
            (QueueState::Rst, QueueState::Rdy) | (QueueState::Rdy, QueueState::Err) | (QueueState::Err, QueueState::Rst)
        );
        if legal {
            Ok(())
        } else {
            Err(Error::IllegalQueueTransition { from: self, to: next })
        }
    }
}
