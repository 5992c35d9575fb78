mod correlator;
mod fragment;
mod retransmit;
mod transport;

use std::time::Duration;

pub use correlator::*;
pub use fragment::*;
pub use retransmit::*;
pub use transport::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    protocol::frame::{FrameCodecBuilder, LinkId, ETHER_TYPE, MIN_PAYLOAD_LEN},
    utils::{Seq16, SeqAllocator},
};

/// Per-frame bytes reserved for the link envelope and packet header.
pub const FRAG_OVERHEAD: usize = 29;
/// At most half the seq space may be in use at once.
pub const MAX_SEQS_IN_USE: usize = 1 << 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Builder {
    pub local_id: LinkId,
    pub device_id: LinkId,
    pub ether_type: u16,
    pub min_payload_len: usize,
    /// Append and verify a CRC-32 trailer.
    pub fcs: bool,
    pub mtu: usize,
    /// Fixed resend interval.
    pub rtd: Duration,
    /// Read fragments allowed on the wire at once.
    pub read_window: usize,
    pub retry_policy: RetryPolicy,
    /// How long an unowned response may sit in the received table.
    pub unclaimed_ttl: Duration,
    pub initial_seq: u16,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            local_id: [0x12, 0x34, 0x56, 0xab, 0xcd, 0xef],
            device_id: [0x00, 0x07, 0xed, 0x12, 0x34, 0x56],
            ether_type: ETHER_TYPE,
            min_payload_len: MIN_PAYLOAD_LEN,
            fcs: false,
            mtu: 1498,
            rtd: Duration::from_millis(500),
            read_window: 3,
            retry_policy: RetryPolicy::Unbounded,
            unclaimed_ttl: Duration::from_secs(30),
            initial_seq: 0,
        }
    }
}

impl Builder {
    #[must_use]
    pub fn max_fragment(&self) -> usize {
        self.mtu.saturating_sub(FRAG_OVERHEAD)
    }

    pub fn build(self) -> Result<Transport, BuildError> {
        let max_fragment = self.max_fragment();
        if max_fragment == 0 {
            return Err(BuildError::MtuTooSmall { mtu: self.mtu });
        }
        if max_fragment > u16::MAX as usize {
            return Err(BuildError::FragmentTooLarge { max_fragment });
        }
        if !(1..=MAX_SEQS_IN_USE).contains(&self.read_window) {
            return Err(BuildError::ReadWindow {
                read_window: self.read_window,
            });
        }
        if self.rtd.is_zero() {
            return Err(BuildError::ZeroRtd);
        }

        let frame_codec = FrameCodecBuilder {
            local: self.local_id,
            remote: self.device_id,
            ether_type: self.ether_type,
            min_payload_len: self.min_payload_len,
            fcs: self.fcs,
        }
        .build();
        let transport = TransportBuilder {
            frame_codec,
            seq_alloc: SeqAllocator::new(Seq16::from_u16(self.initial_seq)),
            retransmit: RetransmissionManager::new(self.rtd, self.retry_policy),
            correlator: ResponseCorrelator::new(self.unclaimed_ttl),
            max_fragment,
            read_window: self.read_window,
        }
        .build();
        Ok(transport)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("mtu {mtu} leaves no room for payload")]
    MtuTooSmall { mtu: usize },
    #[error("fragment size {max_fragment} does not fit the length field")]
    FragmentTooLarge { max_fragment: usize },
    #[error("read window {read_window} out of range")]
    ReadWindow { read_window: usize },
    #[error("retransmission interval must be non-zero")]
    ZeroRtd,
}
