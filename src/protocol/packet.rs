use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::utils::Seq16;

use super::{DecodingError, EncodingError};

pub const ACK_HDR_LEN: usize = 3;
pub const DATA_HDR_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Write = 0x10,
    WriteAck = 0x11,
    Read = 0x20,
    ReadRsp = 0x21,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Write {
        seq: Seq16,
        address: u32,
        payload: Vec<u8>,
    },
    WriteAck {
        seq: Seq16,
    },
    Read {
        seq: Seq16,
        address: u32,
        len: u16,
    },
    ReadRsp {
        seq: Seq16,
        address: u32,
        payload: Vec<u8>,
    },
}

impl Packet {
    /// Decodes one packet from the front of `rdr`.
    ///
    /// Anything left after the declared payload is treated as link padding
    /// and left unread.
    pub fn from_bytes(rdr: &mut Cursor<&[u8]>) -> Result<Self, DecodingError> {
        let opcode = rdr
            .read_u8()
            .map_err(|_e| DecodingError::MalformedFrame { field: "opcode" })?;
        let opcode =
            Opcode::try_from(opcode).map_err(|_e| DecodingError::UnknownOpcode(opcode))?;
        let seq = rdr
            .read_u16::<BigEndian>()
            .map_err(|_e| DecodingError::MalformedFrame { field: "seq" })?;
        let seq = Seq16::from_u16(seq);

        if let Opcode::WriteAck = opcode {
            return Ok(Packet::WriteAck { seq });
        }

        let address = rdr
            .read_u32::<BigEndian>()
            .map_err(|_e| DecodingError::MalformedFrame { field: "address" })?;
        let len = rdr
            .read_u16::<BigEndian>()
            .map_err(|_e| DecodingError::MalformedFrame { field: "len" })?;

        let packet = match opcode {
            Opcode::Read => Packet::Read { seq, address, len },
            Opcode::Write => Packet::Write {
                seq,
                address,
                payload: read_payload(rdr, len)?,
            },
            Opcode::ReadRsp => Packet::ReadRsp {
                seq,
                address,
                payload: read_payload(rdr, len)?,
            },
            Opcode::WriteAck => Packet::WriteAck { seq },
        };
        Ok(packet)
    }

    pub fn append_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        if let Packet::Write { payload, .. } | Packet::ReadRsp { payload, .. } = self {
            if payload.len() > u16::MAX as usize {
                return Err(EncodingError::PayloadTooLong(payload.len()));
            }
        }

        let start = buf.len();
        buf.write_u8(self.opcode().into()).unwrap();
        buf.write_u16::<BigEndian>(self.seq().to_u16()).unwrap();
        match self {
            Packet::WriteAck { .. } => {
                assert_eq!(buf.len() - start, ACK_HDR_LEN);
            }
            Packet::Read { address, len, .. } => {
                buf.write_u32::<BigEndian>(*address).unwrap();
                buf.write_u16::<BigEndian>(*len).unwrap();
                assert_eq!(buf.len() - start, DATA_HDR_LEN);
            }
            Packet::Write {
                address, payload, ..
            }
            | Packet::ReadRsp {
                address, payload, ..
            } => {
                buf.write_u32::<BigEndian>(*address).unwrap();
                buf.write_u16::<BigEndian>(payload.len() as u16).unwrap();
                assert_eq!(buf.len() - start, DATA_HDR_LEN);
                buf.extend_from_slice(payload);
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(self.len());
        self.append_to(&mut buf)?;
        Ok(buf)
    }

    #[must_use]
    #[inline]
    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::Write { .. } => Opcode::Write,
            Packet::WriteAck { .. } => Opcode::WriteAck,
            Packet::Read { .. } => Opcode::Read,
            Packet::ReadRsp { .. } => Opcode::ReadRsp,
        }
    }

    #[must_use]
    #[inline]
    pub fn seq(&self) -> Seq16 {
        match self {
            Packet::Write { seq, .. }
            | Packet::WriteAck { seq }
            | Packet::Read { seq, .. }
            | Packet::ReadRsp { seq, .. } => *seq,
        }
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Packet::WriteAck { .. } => ACK_HDR_LEN,
            Packet::Read { .. } => DATA_HDR_LEN,
            Packet::Write { payload, .. } | Packet::ReadRsp { payload, .. } => {
                DATA_HDR_LEN + payload.len()
            }
        }
    }
}

fn read_payload(rdr: &mut Cursor<&[u8]>, len: u16) -> Result<Vec<u8>, DecodingError> {
    let mut payload = vec![0; len as usize];
    rdr.read_exact(&mut payload)
        .map_err(|_e| DecodingError::MalformedFrame { field: "payload" })?;
    Ok(payload)
}
