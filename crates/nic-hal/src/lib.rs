//! Contracts that a user-space network-appliance driver depends on but does
//! not implement itself: PCI access, DMA allocation, and the app/link
//! protocol that moves packets between processing stages.
//!
//! Drivers (such as `connectx4`) are written against these traits; a host
//! program supplies concrete implementations (VFIO, a UIO-backed allocator,
//! a shared-memory ring) and wires them together.

mod app;
mod dma;
mod link;
mod pci;

pub use app::NetworkApp;
pub use dma::{DmaAllocator, PhysicalAddress};
pub use link::{Link, Packet, MAX_PACKET_LEN};
pub use pci::{PciAddress, PciDevice};
