//! # Frame
//!
//! ```text
//! 0               6              12      14                  (BYTE)
//! +---------------+---------------+-------+
//! |    dest id    |    src id     | type  |
//! +---------------+---------------+-------+-----------------+
//! |                                                         |
//! |        Packet (zero padded to the minimum length)       |
//! |                                                         |
//! +-------------------------------+-------------------------+
//! |    CRC-32 (LE, optional)      |
//! +-------------------------------+
//! ```
//!
//! # Packet
//!
//! ```text
//! 0   1       3               7       9                      (BYTE)
//! +---+-------+---------------+-------+
//! |op |  seq  |    address    |  len  |   WRITE, READ, READ_RSP
//! +---+-------+---------------+-------+
//! |          payload (WRITE, READ_RSP)          |
//! +---------------------------------------------+
//!
//! +---+-------+
//! |op |  seq  |                           WRITE_ACK
//! +---+-------+
//! ```
//!
//! # Invariants
//!
//! - `len` equals the payload length whenever a payload is present
//! - bytes after the declared payload are link padding

use thiserror::Error;

pub mod frame;
pub mod packet;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodingError {
    #[error("malformed frame: bad `{field}`")]
    MalformedFrame { field: &'static str },
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("foreign ether type {0:#06x}")]
    ForeignEtherType(u16),
    #[error("frame check sequence mismatch")]
    BadCrc,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("payload of {0} bytes does not fit the length field")]
    PayloadTooLong(usize),
}
