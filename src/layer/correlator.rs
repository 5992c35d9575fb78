use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::{protocol::packet::Packet, utils::Seq16};

use super::retransmit::{Expect, RetransmissionManager};

#[derive(Debug, PartialEq, Eq)]
pub enum Correlated {
    Acked { seq: Seq16 },
    Responded { seq: Seq16 },
}

#[derive(Debug, PartialEq, Eq)]
pub enum Ignored {
    /// Nothing outstanding under this seq: a duplicate, or not ours.
    DuplicateOrUnknown { seq: Seq16 },
    /// Outstanding, but the answer does not fit the request.
    Mismatch { seq: Seq16 },
    /// A request-kind packet; the host never serves those.
    NotAResponse { seq: Seq16 },
}

struct ReceivedResponse {
    payload: Vec<u8>,
    received: Instant,
}

/// Matches inbound acks and responses to outstanding requests and keeps
/// the payloads of matched responses until they are claimed.
pub struct ResponseCorrelator {
    received: HashMap<Seq16, ReceivedResponse>,
    ttl: Duration,
}

impl ResponseCorrelator {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        ResponseCorrelator {
            received: HashMap::new(),
            ttl,
        }
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.received.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }

    #[must_use]
    #[inline]
    pub fn contains(&self, seq: Seq16) -> bool {
        self.received.contains_key(&seq)
    }

    pub fn correlate(
        &mut self,
        packet: Packet,
        retransmit: &mut RetransmissionManager,
        now: Instant,
    ) -> Result<Correlated, Ignored> {
        let seq = packet.seq();
        let expect = match retransmit.get(seq) {
            Some(request) => request.expect(),
            None => {
                return match packet {
                    Packet::WriteAck { .. } | Packet::ReadRsp { .. } => {
                        Err(Ignored::DuplicateOrUnknown { seq })
                    }
                    Packet::Write { .. } | Packet::Read { .. } => Err(Ignored::NotAResponse { seq }),
                };
            }
        };

        match (packet, expect) {
            (Packet::WriteAck { .. }, Expect::Ack) => {
                retransmit.complete(seq);
                Ok(Correlated::Acked { seq })
            }
            (
                Packet::ReadRsp {
                    address, payload, ..
                },
                Expect::Response {
                    address: expected_address,
                    len,
                },
            ) if address == expected_address && payload.len() == len as usize => {
                retransmit.complete(seq);
                self.received.insert(
                    seq,
                    ReceivedResponse {
                        payload,
                        received: now,
                    },
                );
                Ok(Correlated::Responded { seq })
            }
            (Packet::Write { .. } | Packet::Read { .. }, _) => Err(Ignored::NotAResponse { seq }),
            _ => Err(Ignored::Mismatch { seq }),
        }
    }

    /// Takes the payload received under `seq`, if any.
    #[must_use]
    pub fn claim(&mut self, seq: Seq16) -> Option<Vec<u8>> {
        self.received.remove(&seq).map(|r| r.payload)
    }

    pub fn discard(&mut self, seq: Seq16) -> bool {
        self.received.remove(&seq).is_some()
    }

    /// Drops entries older than the ttl that no live operation owns.
    ///
    /// Returns how many were dropped.
    pub fn evict_expired(&mut self, now: Instant, is_owned: impl Fn(Seq16) -> bool) -> usize {
        let ttl = self.ttl;
        let before = self.received.len();
        self.received
            .retain(|&seq, r| is_owned(seq) || now.duration_since(r.received) < ttl);
        before - self.received.len()
    }
}
