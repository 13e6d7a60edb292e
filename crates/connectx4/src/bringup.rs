//! Bring-up orchestration: the strict, synchronous sequence that turns a
//! freshly reset device into one with a working RX path, and the
//! best-effort reverse sequence that tears it back down.

use nic_hal::{DmaAllocator, PciDevice};

use crate::clock::Clock;
use crate::command_interface::CommandInterface;
use crate::commands::{CapSet, FlowTableType, PageType, TeardownMode};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::init_segment::InitSegment;
use crate::objects::{Cq, Eq, FlowTable, ProtectionDomain, QueueState, Rq, Sq, Tir, Tis, TransportDomain, Uar, UarPage, UAR_PAGE_SIZE};

/// Mailbox capacity in pages. `QUERY_HCA_CAP`'s output needs close to 4 KiB
/// (8 pages of 512 B payload each); double that for headroom.
const MAILBOX_CAPACITY: usize = 16;

/// Every HCA object the driver owns once bring-up completes, plus the
/// command interface needed to tear it back down.
pub struct HcaObjects<C: Clock> {
    pub cmd: CommandInterface<'static, C>,
    pub uar: Uar,
    pub pd: ProtectionDomain,
    pub td: TransportDomain,
    pub rlkey: u32,
    pub eq: Eq,
    pub cq_rx: Cq,
    pub cq_tx: Cq,
    pub sq: Sq,
    pub rq: Rq,
    pub tis: Tis,
    pub tir: Tir,
    pub flow_table: FlowTable,
}

fn alloc_pages<D: DmaAllocator, C: Clock>(dma: &mut D, cmd: &mut CommandInterface<'static, C>, n: i32) -> Result<()> {
    if n <= 0 {
        return Ok(());
    }
    let mut pages = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let (_buf, phys) = dma.alloc(4096, 4096).map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
        pages.push(phys);
    }
    cmd.manage_pages_allocate(&pages)
}

/// Allocates one contiguous region and a single-entry PAS page pointing at
/// its base address. Valid because our `DmaAllocator` contract guarantees
/// physical contiguity of one allocation, so firmware never needs more than
/// one PAS entry regardless of the region's page count.
fn alloc_with_pas<D: DmaAllocator>(dma: &mut D, size: usize) -> Result<(&'static mut [u8], nic_hal::PhysicalAddress, nic_hal::PhysicalAddress)> {
    let (region, region_phys) = dma.alloc(size, 4096).map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
    let (pas_page, pas_phys) = dma.alloc(4096, 4096).map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
    crate::bits::write_u32(pas_page, 0x00, crate::bits::phys_hi(region_phys.as_u64()));
    crate::bits::write_u32(pas_page, 0x04, crate::bits::phys_lo(region_phys.as_u64()));
    Ok((region, region_phys, pas_phys))
}

/// Runs the full bring-up sequence. `verify_caps`
/// queries `QUERY_HCA_CAP` and rejects the configuration if the firmware's
/// limits cannot accommodate the requested queue depths; production
/// callers should always pass `true`. It is optional at this layer only so
/// the exact opcode trace in the no-cap-query path can be tested in
/// isolation.
pub fn bring_up<P: PciDevice, D: DmaAllocator, C: Clock>(
    pci: &mut P,
    dma: &mut D,
    clock: C,
    config: &Config,
    verify_caps: bool,
) -> Result<HcaObjects<C>> {
    config.validate()?;

    log::debug!("unbinding {} from host driver", config.pciaddress);
    pci.unbind().map_err(|e| Error::Pci(e.to_string()))?;
    pci.reset().map_err(|e| Error::Pci(e.to_string()))?;
    pci.set_bus_master(true).map_err(|e| Error::Pci(e.to_string()))?;

    let bar = pci.map_bar(0).map_err(|e| Error::Pci(e.to_string()))?;
    let init_segment = InitSegment::new(bar);
    let mut cmd = CommandInterface::new(init_segment, dma, clock, MAILBOX_CAPACITY)?;

    log::debug!("polling for firmware ready");
    cmd.poll_until_ready();

    log::debug!("ENABLE_HCA");
    cmd.enable_hca()?;
    log::debug!("SET_ISSI(1)");
    cmd.set_issi(1)?;
    let boot_pages = cmd.query_pages(PageType::Boot)?;
    alloc_pages(dma, &mut cmd, boot_pages)?;

    if verify_caps {
        log::debug!("QUERY_HCA_CAP");
        let caps = cmd.query_hca_cap(CapSet::Current)?;
        let log_sendq = log2_ceil(config.sendq_size);
        let log_recvq = log2_ceil(config.recvq_size);
        if caps.log_max_sq < log_sendq || caps.log_max_rq < log_recvq {
            return Err(Error::Command {
                opcode: 0x904,
                syndrome: 0,
                source: crate::error::CommandStatus::ExceedLim,
            });
        }
    }

    let init_pages = cmd.query_pages(PageType::Init)?;
    alloc_pages(dma, &mut cmd, init_pages)?;
    log::debug!("INIT_HCA");
    cmd.init_hca()?;
    let regular_pages = cmd.query_pages(PageType::Regular)?;
    alloc_pages(dma, &mut cmd, regular_pages)?;

    log::debug!("ALLOC_UAR");
    let uar = Uar(cmd.alloc_uar()?);

    let doorbell_bar = pci.map_bar(2).map_err(|e| Error::Pci(e.to_string()))?;
    let uar_page_offset = uar.0 as usize * UAR_PAGE_SIZE;
    let sq_uar = UarPage::new(&mut doorbell_bar[uar_page_offset..uar_page_offset + UAR_PAGE_SIZE]);

    let (eq_ring, _eq_ring_phys, eq_pas) = alloc_with_pas(dma, 128 * crate::descriptors::EQE_SIZE)?;
    log::debug!("CREATE_EQ");
    let eqn = cmd.create_eq(uar.0, eq_pas)?;
    let eq = Eq::new(eqn, eq_ring, 128);

    log::debug!("ALLOC_PD");
    let pd = ProtectionDomain(cmd.alloc_pd()?);
    log::debug!("ALLOC_TRANSPORT_DOMAIN");
    let td = TransportDomain(cmd.alloc_transport_domain()?);
    log::debug!("QUERY_SPECIAL_CONTEXTS");
    let rlkey = cmd.query_special_contexts()?;

    log::debug!("CREATE_TIS");
    let tis = Tis(cmd.create_tis(0, td.0)?);

    let (cq_rx_ring, _cq_rx_phys, cq_rx_pas) = alloc_with_pas(dma, 1024 * crate::descriptors::CQE_SIZE)?;
    let (_cq_rx_db, cq_rx_db_phys) = dma.alloc(16, 16).map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
    log::debug!("CREATE_CQ (rx)");
    let cqn_rx = cmd.create_cq(uar.0, eqn, cq_rx_pas, cq_rx_db_phys)?;
    let cq_rx = Cq::new(cqn_rx, cq_rx_ring, 1024);

    let (cq_tx_ring, _cq_tx_phys, cq_tx_pas) = alloc_with_pas(dma, 1024 * crate::descriptors::CQE_SIZE)?;
    let (_cq_tx_db, cq_tx_db_phys) = dma.alloc(16, 16).map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
    log::debug!("CREATE_CQ (tx)");
    let cqn_tx = cmd.create_cq(uar.0, eqn, cq_tx_pas, cq_tx_db_phys)?;
    let cq_tx = Cq::new(cqn_tx, cq_tx_ring, 1024);

    let wqe_region_size = (config.sendq_size as usize + config.recvq_size as usize) * 64;
    let (wqe_region, _wqe_region_phys, _wqe_pas) = alloc_with_pas(dma, wqe_region_size)?;
    let (rq_region, sq_region) = wqe_region.split_at_mut(config.recvq_size as usize * 64);

    let (doorbell, _) = dma.alloc(16, 16).map_err(|e| Error::DmaAllocFailed(e.to_string()))?;
    let (rq_db, sq_db) = doorbell.split_at_mut(8);

    log::debug!("CREATE_RQ");
    let log_rq_size = log2_ceil(config.recvq_size);
    let rqn = cmd.create_rq(cqn_rx, pd.0, log_rq_size, nic_hal::PhysicalAddress(rq_db.as_ptr() as u64), nic_hal::PhysicalAddress(rq_region.as_ptr() as u64))?;
    let rq = Rq::new(rqn, rq_region, rq_db, config.recvq_size);

    log::debug!("CREATE_SQ");
    let log_sq_size = log2_ceil(config.sendq_size);
    let sqn = cmd.create_sq(cqn_tx, pd.0, log_sq_size, nic_hal::PhysicalAddress(sq_db.as_ptr() as u64), nic_hal::PhysicalAddress(sq_region.as_ptr() as u64), tis.0)?;
    let sq = Sq::new(sqn, sq_region, sq_db, config.sendq_size, sq_uar);

    log::debug!("CREATE_TIR (direct)");
    let tir = Tir(cmd.create_tir_direct(rqn, td.0)?);

    log::debug!("CREATE_FLOW_TABLE (rx)");
    let table_id = cmd.create_flow_table(FlowTableType::Rx, 4)?;
    log::debug!("CREATE_FLOW_GROUP (wildcard)");
    let group_id = cmd.create_flow_group_wildcard(table_id, FlowTableType::Rx, 0, 0)?;
    log::debug!("SET_FLOW_TABLE_ENTRY (wildcard -> TIR)");
    cmd.set_flow_table_entry_wildcard(table_id, FlowTableType::Rx, group_id, 0, tir.0)?;
    log::debug!("SET_FLOW_TABLE_ROOT");
    cmd.set_flow_table_root(table_id, FlowTableType::Rx)?;
    let flow_table = FlowTable { id: table_id, table_type: FlowTableType::Rx };

    log::debug!("MODIFY_RQ RST->RDY");
    cmd.modify_rq(rqn, QueueState::Rst, QueueState::Rdy)?;
    log::debug!("MODIFY_SQ RST->RDY");
    cmd.modify_sq(sqn, QueueState::Rst, QueueState::Rdy)?;

    Ok(HcaObjects { cmd, uar, pd, td, rlkey, eq, cq_rx, cq_tx, sq, rq, tis, tir, flow_table })
}

/// Reverses bring-up, best-effort: transitions queues to `ERR` then `RST`,
/// destroys the flow table's root binding, tears down the HCA, and resets
/// the PCI device. No single failure here aborts the sequence; each step
/// is attempted and logged.
pub fn tear_down<P: PciDevice, C: Clock>(pci: &mut P, objects: &mut HcaObjects<C>) {
    if let Err(e) = objects.cmd.modify_sq(objects.sq.sqn, QueueState::Rdy, QueueState::Err) {
        log::warn!("teardown: modify_sq RDY->ERR failed: {e}");
    }
    if let Err(e) = objects.cmd.modify_rq(objects.rq.rqn, QueueState::Rdy, QueueState::Err) {
        log::warn!("teardown: modify_rq RDY->ERR failed: {e}");
    }
    if let Err(e) = objects.cmd.modify_sq(objects.sq.sqn, QueueState::Err, QueueState::Rst) {
        log::warn!("teardown: modify_sq ERR->RST failed: {e}");
    }
    if let Err(e) = objects.cmd.modify_rq(objects.rq.rqn, QueueState::Err, QueueState::Rst) {
        log::warn!("teardown: modify_rq ERR->RST failed: {e}");
    }
    if let Err(e) = objects.cmd.teardown_hca(TeardownMode::Graceful) {
        log::warn!("teardown: TEARDOWN_HCA failed: {e}");
    }
    if let Err(e) = objects.cmd.disable_hca() {
        log::warn!("teardown: DISABLE_HCA failed: {e}");
    }
    if let Err(e) = pci.reset() {
        log::warn!("teardown: PCI reset failed: {e}");
    }
}

fn log2_ceil(x: u32) -> u8 {
    assert!(x > 0);
    32 - (x - 1).leading_zeros().min(31) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log2_ceil_matches_power_of_two_sizes() {
        assert_eq!(log2_ceil(1), 0);
        assert_eq!(log2_ceil(2), 1);
        assert_eq!(log2_ceil(1024), 10);
        assert_eq!(log2_ceil(16), 4);
    }
}
