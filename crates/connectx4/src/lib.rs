//! Mellanox ConnectX-4/LX command-channel driver: register/bit-range
//! primitives, the command-channel transport, the HCA object model, bring-up
//! orchestration, and the steady-state receive/transmit datapath.

pub mod bits;
pub mod bringup;
pub mod clock;
pub mod command_interface;
pub mod commands;
pub mod config;
pub mod datapath;
pub mod descriptors;
pub mod error;
pub mod init_segment;
pub mod objects;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};

use nic_hal::{DmaAllocator, Link, NetworkApp, PciDevice};

use bringup::HcaObjects;
use datapath::{RxRing, TxRing};

/// The queue pair number of a unicast-direct send queue (there is exactly
/// one in this driver, so its SQ number doubles as its QPN for WQE
/// encoding purposes).
fn qpn_of(sqn: u32) -> u32 {
    sqn
}

/// A brought-up ConnectX-4/LX device with one RX and one TX datapath. `P`
/// is the PCI collaborator, `D` the DMA allocator, `C` the clock, and `L`
/// the link type wired to both the receive and transmit sides.
pub struct ConnectX4Nic<P: PciDevice, D: DmaAllocator, C: Clock, L: Link> {
    pci: P,
    dma: D,
    objects: HcaObjects<C>,
    rx_ring: RxRing,
    tx_ring: TxRing,
    rx_link: L,
    tx_link: L,
    stopped: bool,
}

/// Bundles the configuration and host collaborators `ConnectX4Nic::new`
/// needs; [`NetworkApp::new`] takes exactly one argument, so everything the
/// driver cannot construct itself travels through this struct.
pub struct Bootstrap<P, D, C, L> {
    pub config: Config,
    pub pci: P,
    pub dma: D,
    pub clock: C,
    pub rx_link: L,
    pub tx_link: L,
}

impl<P: PciDevice, D: DmaAllocator, C: Clock, L: Link> NetworkApp for ConnectX4Nic<P, D, C, L> {
    type Config = Bootstrap<P, D, C, L>;
    type Error = Error;

    fn new(mut bootstrap: Self::Config) -> Result<Self> {
        let mut objects = bringup::bring_up(&mut bootstrap.pci, &mut bootstrap.dma, bootstrap.clock, &bootstrap.config, true)?;

        let mut rx_ring = RxRing::new(&mut bootstrap.dma, bootstrap.config.recvq_size)?;
        rx_ring.post_all(&mut objects.rq, objects.rlkey);
        let tx_ring = TxRing::new(&mut bootstrap.dma, bootstrap.config.sendq_size)?;

        Ok(ConnectX4Nic {
            pci: bootstrap.pci,
            dma: bootstrap.dma,
            objects,
            rx_ring,
            tx_ring,
            rx_link: bootstrap.rx_link,
            tx_link: bootstrap.tx_link,
            stopped: false,
        })
    }

    fn push(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.objects.eq.poll(|event_type| {
            log::debug!("async event {event_type:#04x}");
        });
        self.tx_ring.reap(&mut self.objects.cq_tx);
        let qpn = qpn_of(self.objects.sq.sqn);
        let lkey = self.objects.rlkey;
        self.tx_ring.drain_from(&mut self.objects.sq, qpn, lkey, &mut self.tx_link);
        Ok(())
    }

    fn pull(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.rx_ring
            .reap_into(&mut self.objects.cq_rx, &mut self.objects.rq, self.objects.rlkey, &mut self.rx_link);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        bringup::tear_down(&mut self.pci, &mut self.objects);
        self.stopped = true;
        Ok(())
    }
}
