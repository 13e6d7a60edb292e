use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A PCI bus/device/function address in `bbbb:dd.f` form, e.g. `0000:03:00.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PciAddress(String);

#[derive(Debug, Error)]
#[error("malformed PCI address {0:?}")]
pub struct InvalidPciAddress(String);

impl FromStr for PciAddress {
    type Err = InvalidPciAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Loose validation: "domain:bus:device.function", hex digits and colons/dot only.
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.') {
            return Err(InvalidPciAddress(s.to_string()));
        }
        Ok(PciAddress(s.to_string()))
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The host's PCI access layer: unbinding a device from its kernel driver,
/// resetting it, enabling bus mastering, and mapping a BAR into the
/// process's address space. `connectx4` never touches sysfs/VFIO directly;
/// it only calls through this trait.
pub trait PciDevice {
    type Error: std::error::Error + 'static;

    /// Detaches the device from whatever driver the host kernel currently
    /// has bound to it, so user space owns it exclusively.
    fn unbind(&mut self) -> Result<(), Self::Error>;

    /// Issues a function-level reset (or equivalent) of the device.
    fn reset(&mut self) -> Result<(), Self::Error>;

    /// Enables or disables bus mastering (required before any DMA).
    fn set_bus_master(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Maps the given BAR and returns a byte slice over it, valid for the
    /// lifetime of the device. BAR 0 carries the initialization segment and
    /// command queue; BAR 2 carries the UAR pages used for doorbells.
    fn map_bar(&mut self, bar: u8) -> Result<&'static mut [u8], Self::Error>;
}
