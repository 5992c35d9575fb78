use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};

use super::{packet::Packet, DecodingError, EncodingError};

pub const ETH_HDR_LEN: usize = 14;
pub const FCS_LEN: usize = 4;
pub const MIN_PAYLOAD_LEN: usize = 46;
pub const ETHER_TYPE: u16 = 0x88b5;

/// 6-byte link-layer station id.
pub type LinkId = [u8; 6];

pub struct FrameCodec {
    local: LinkId,
    remote: LinkId,
    ether_type: u16,
    min_payload_len: usize,
    fcs: bool,
}

pub struct FrameCodecBuilder {
    pub local: LinkId,
    pub remote: LinkId,
    pub ether_type: u16,
    pub min_payload_len: usize,
    pub fcs: bool,
}

impl FrameCodecBuilder {
    #[must_use]
    pub fn build(self) -> FrameCodec {
        FrameCodec {
            local: self.local,
            remote: self.remote,
            ether_type: self.ether_type,
            min_payload_len: self.min_payload_len,
            fcs: self.fcs,
        }
    }
}

impl FrameCodec {
    /// Wraps `packet` in an envelope addressed to the remote station.
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, EncodingError> {
        let mut frame = Vec::with_capacity(self.max_frame_len(packet.len()));
        frame.extend_from_slice(&self.remote);
        frame.extend_from_slice(&self.local);
        frame.write_u16::<BigEndian>(self.ether_type).unwrap();
        packet.append_to(&mut frame)?;
        if frame.len() < ETH_HDR_LEN + self.min_payload_len {
            frame.resize(ETH_HDR_LEN + self.min_payload_len, 0);
        }
        if self.fcs {
            let crc = fcs(&frame);
            frame.extend_from_slice(&crc);
        }
        Ok(frame)
    }

    pub fn decode(&self, frame: &[u8]) -> Result<Packet, DecodingError> {
        if frame.len() < self.min_frame_len() {
            return Err(DecodingError::MalformedFrame { field: "frame_len" });
        }
        let body = if self.fcs {
            let (body, trailer) = frame.split_at(frame.len() - FCS_LEN);
            if fcs(body) != trailer {
                return Err(DecodingError::BadCrc);
            }
            body
        } else {
            frame
        };

        let ether_type = BigEndian::read_u16(&body[12..ETH_HDR_LEN]);
        if ether_type != self.ether_type {
            return Err(DecodingError::ForeignEtherType(ether_type));
        }

        let mut rdr = Cursor::new(&body[ETH_HDR_LEN..]);
        Packet::from_bytes(&mut rdr)
    }

    #[must_use]
    #[inline]
    pub fn min_frame_len(&self) -> usize {
        ETH_HDR_LEN + self.min_payload_len + self.fcs_len()
    }

    #[must_use]
    #[inline]
    fn max_frame_len(&self, packet_len: usize) -> usize {
        ETH_HDR_LEN + usize::max(packet_len, self.min_payload_len) + self.fcs_len()
    }

    #[inline]
    fn fcs_len(&self) -> usize {
        if self.fcs {
            FCS_LEN
        } else {
            0
        }
    }
}

/// IEEE 802.3 frame check sequence over `bytes`, in wire order.
#[must_use]
pub fn fcs(bytes: &[u8]) -> [u8; FCS_LEN] {
    let mut trailer = [0; FCS_LEN];
    LittleEndian::write_u32(&mut trailer, crc32fast::hash(bytes));
    trailer
}
