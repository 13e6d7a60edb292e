/// Largest Ethernet frame the link protocol carries: 1514-byte MTU frame
/// plus a 4-byte 802.1Q tag.
pub const MAX_PACKET_LEN: usize = 1514 + 4;

/// A single packet buffer moving between apps. `length` is always `<=
/// MAX_PACKET_LEN`; `data` may be larger than `length` (the unused tail is
/// not meaningful).
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    pub length: u16,
}

impl Packet {
    pub fn new(data: Vec<u8>, length: u16) -> Self {
        debug_assert!(length as usize <= MAX_PACKET_LEN.max(data.len()));
        Packet { data, length }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.length as usize]
    }
}

/// A bounded ring of packet handles connecting two apps. The driver both
/// consumes packets (from an input link, to transmit) and produces them
/// (onto an output link, after receiving), but never constructs a link
/// itself — the framework wires links between apps.
pub trait Link {
    /// Removes and returns the next packet, if any.
    fn receive(&mut self) -> Option<Packet>;

    /// Pushes a packet onto the link. Returns it back unconsumed if the
    /// link is full.
    fn transmit(&mut self, packet: Packet) -> Result<(), Packet>;

    /// Number of packets currently available to `receive`.
    fn nreadable(&self) -> usize;

    fn full(&self) -> bool;

    fn empty(&self) -> bool {
        self.nreadable() == 0
    }
}
