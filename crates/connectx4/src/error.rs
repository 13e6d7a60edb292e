//! Error taxonomy for the command channel, the HCA objects, and the
//! datapath. Every command returns a `Result`; bring-up aborts and tears
//! down on the first error.

use thiserror::Error;

/// Delivery-level transport errors, read from the command entry's own
/// `status` field (distinct from the command's own status/syndrome).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("signature error")]
    SignatureError,
    #[error("token error")]
    TokenError,
    #[error("bad block number")]
    BadBlockNumber,
    #[error("bad input pointer")]
    BadInputPtr,
    #[error("bad output pointer")]
    BadOutputPtr,
    #[error("internal error")]
    InternalError,
    #[error("input length error")]
    InputLenError,
    #[error("output length error")]
    OutputLenError,
    #[error("reserved field not zero")]
    ReservedNotZero,
    #[error("bad command type")]
    BadCommandType,
}

impl TransportError {
    /// Maps the 7-bit delivery status at entry offset `0x3C, [7:1]`.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::SignatureError,
            2 => Self::TokenError,
            3 => Self::BadBlockNumber,
            4 => Self::BadOutputPtr,
            5 => Self::BadInputPtr,
            6 => Self::InternalError,
            7 => Self::InputLenError,
            8 => Self::OutputLenError,
            9 => Self::ReservedNotZero,
            10 => Self::BadCommandType,
            _ => return None,
        })
    }
}

/// Command-level firmware errors, read from output dword 0 bits `[31:24]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandStatus {
    #[error("internal error")]
    InternalErr,
    #[error("bad opcode")]
    BadOp,
    #[error("bad parameter")]
    BadParam,
    #[error("bad system state")]
    BadSysState,
    #[error("bad resource")]
    BadResource,
    #[error("resource busy")]
    ResourceBusy,
    #[error("limit exceeded")]
    ExceedLim,
    #[error("bad resource state")]
    BadResState,
    #[error("no resources")]
    NoResources,
    #[error("bad input length")]
    BadInputLen,
    #[error("bad output length")]
    BadOutputLen,
    #[error("bad resource state (alt)")]
    BadResourceState,
    #[error("bad packet")]
    BadPkt,
    #[error("bad size")]
    BadSize,
}

impl CommandStatus {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0x01 => Self::InternalErr,
            0x02 => Self::BadOp,
            0x03 => Self::BadParam,
            0x04 => Self::BadSysState,
            0x05 => Self::BadResource,
            0x06 => Self::ResourceBusy,
            0x08 => Self::ExceedLim,
            0x09 => Self::BadResState,
            0x0F => Self::NoResources,
            0x50 => Self::BadInputLen,
            0x51 => Self::BadOutputLen,
            0x10 => Self::BadResourceState,
            0x30 => Self::BadPkt,
            0x40 => Self::BadSize,
            _ => return None,
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("command {opcode:#06x}: transport error {source} (token {token:#04x})")]
    Transport {
        opcode: u16,
        token: u8,
        source: TransportError,
    },

    #[error("command {opcode:#06x}: {source} (syndrome {syndrome:#010x})")]
    Command {
        opcode: u16,
        syndrome: u32,
        source: CommandStatus,
    },

    #[error("HCA health syndrome {code:#04x} observed while polling command {opcode:#06x}")]
    HcaHealth { opcode: u16, code: u8 },

    #[error("input mailbox chain overflow: {requested} pages requested, capacity {capacity}")]
    InputOverflow { requested: usize, capacity: usize },

    #[error("output mailbox chain overflow: {requested} pages requested, capacity {capacity}")]
    OutputOverflow { requested: usize, capacity: usize },

    #[error("DMA allocation failed: {0}")]
    DmaAllocFailed(String),

    #[error("mailbox capacity exceeded")]
    MailboxOverflow,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("queue state transition {from:?} -> {to:?} is not legal")]
    IllegalQueueTransition { from: crate::objects::QueueState, to: crate::objects::QueueState },

    #[error("PCI error: {0}")]
    Pci(String),
}

pub type Result<T> = std::result::Result<T, Error>;
