//! Host-supplied configuration. No file format or CLI flag parsing is
//! defined here; a host program builds this however it likes.

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub pciaddress: String,
    pub sendq_size: u32,
    pub recvq_size: u32,
    pub mac: Option<[u8; 6]>,
}

impl Config {
    pub fn new(pciaddress: impl Into<String>) -> Self {
        Config {
            pciaddress: pciaddress.into(),
            sendq_size: 1024,
            recvq_size: 1024,
            mac: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.pciaddress.is_empty() {
            return Err(Error::InvalidConfig("pciaddress must not be empty".into()));
        }
        if !self.sendq_size.is_power_of_two() || !self.recvq_size.is_power_of_two() {
            return Err(Error::InvalidConfig("sendq_size and recvq_size must be powers of two".into()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pciaddress: String::new(),
            sendq_size: 1024,
            recvq_size: 1024,
            mac: None,
        }
    }
}
