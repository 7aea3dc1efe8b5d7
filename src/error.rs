use std::io;

use crate::wire::Opcode;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    #[error("truncated message: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("invalid address family {0}")]
    InvalidAddress(u8),
    #[error("payload of {0} bytes exceeds the {1} byte limit")]
    TooLarge(usize, usize),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed frame: {0}")]
    Frame(#[from] WireError),
    #[error("invalid frame kind {0}")]
    FrameKind(u8),
    #[error("operation {0} abandoned before a reply arrived")]
    Abandoned(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("{requested} hops requested but only {available} servers")]
    ChainTooLong { requested: usize, available: usize },
    #[error("a chain needs at least one hop")]
    EmptyChain,
    #[error("{field} of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        field: &'static str,
        size: u32,
        max: usize,
    },
    #[error("expected a {expected:?} response, got {got:?}")]
    UnexpectedResponse { expected: Opcode, got: Opcode },
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
