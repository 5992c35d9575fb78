//! Errors surfaced to callers of the transport.

use thiserror::Error;

use crate::{layer::BuildError, protocol::EncodingError, utils::Seq16};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The transfer does not fit the mode it was requested in.
    #[error("transfer of {len} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// The transfer would run past the end of the 32-bit address space.
    #[error("transfer of {len} bytes at {address:#010x} runs past the address space")]
    AddressOverflow { address: u32, len: usize },

    /// The retry policy ran out before the device answered.
    #[error("no response for seq {seq}")]
    NoResponse { seq: Seq16 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("session closed")]
    Closed,

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("invalid configuration: {0}")]
    Build(#[from] BuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
