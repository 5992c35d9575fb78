use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    time::Instant,
};

use log::{debug, trace, warn};

use crate::{
    error::Error,
    protocol::{frame::FrameCodec, packet::Packet},
    utils::{Seq16, SeqAllocator},
};

use super::{
    correlator::{Correlated, Ignored, ResponseCorrelator},
    fragment::{split, PendingFragmentSet},
    retransmit::{Expect, Expired, OutstandingRequest, RetransmissionManager},
    MAX_SEQS_IN_USE,
};

/// Caller-chosen handle for one `write` or `read`.
pub type OpId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Split the transfer over as many frames as it takes.
    Fragmented,
    /// Control-register access: the transfer must fit one frame.
    SingleFrame,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    Written,
    Read(Vec<u8>),
}

enum Op {
    Write {
        queued: VecDeque<(u32, Vec<u8>)>,
        in_flight: HashSet<Seq16>,
    },
    Read {
        queued: VecDeque<(u32, u16)>,
        fragments: PendingFragmentSet,
    },
}

impl Op {
    fn is_done(&self) -> bool {
        match self {
            Op::Write { queued, in_flight } => queued.is_empty() && in_flight.is_empty(),
            Op::Read { queued, fragments } => queued.is_empty() && fragments.is_complete(),
        }
    }

    fn seqs(&self) -> Vec<Seq16> {
        match self {
            Op::Write { in_flight, .. } => in_flight.iter().copied().collect(),
            Op::Read { fragments, .. } => fragments.issued().to_vec(),
        }
    }
}

/// Checks a transfer against the mode and address space limits.
pub fn check_transfer(
    address: u32,
    len: usize,
    mode: Mode,
    max_fragment: usize,
) -> Result<(), Error> {
    if let Mode::SingleFrame = mode {
        if len > max_fragment {
            return Err(Error::PayloadTooLarge {
                len,
                max: max_fragment,
            });
        }
    }
    if address as u64 + len as u64 > u32::MAX as u64 + 1 {
        return Err(Error::AddressOverflow { address, len });
    }
    Ok(())
}

/// Host side of the register transport, free of I/O.
///
/// Frames to put on the wire are collected with [`Self::pop_output`] and
/// finished operations with [`Self::pop_completion`]. Time only advances
/// through the `now` passed in.
pub struct Transport {
    frame_codec: FrameCodec,
    seq_alloc: SeqAllocator,
    retransmit: RetransmissionManager,
    correlator: ResponseCorrelator,
    max_fragment: usize,
    read_window: usize,

    // submission order is issue order
    ops: BTreeMap<OpId, Op>,
    // seqs that are outstanding or hold an unclaimed response
    owners: HashMap<Seq16, OpId>,

    output: VecDeque<Vec<u8>>,
    completions: VecDeque<(OpId, Result<Completion, Error>)>,

    stat: LocalStat,
}

pub struct TransportBuilder {
    pub frame_codec: FrameCodec,
    pub seq_alloc: SeqAllocator,
    pub retransmit: RetransmissionManager,
    pub correlator: ResponseCorrelator,
    pub max_fragment: usize,
    pub read_window: usize,
}

impl TransportBuilder {
    #[must_use]
    pub fn build(self) -> Transport {
        let this = Transport {
            frame_codec: self.frame_codec,
            seq_alloc: self.seq_alloc,
            retransmit: self.retransmit,
            correlator: self.correlator,
            max_fragment: self.max_fragment,
            read_window: self.read_window,
            ops: BTreeMap::new(),
            owners: HashMap::new(),
            output: VecDeque::new(),
            completions: VecDeque::new(),
            stat: LocalStat::default(),
        };
        this.check_rep();
        this
    }
}

impl Transport {
    #[inline]
    fn check_rep(&self) {
        assert!(self.owners.len() <= MAX_SEQS_IN_USE);
        assert!(self.retransmit.len() <= self.owners.len());
    }

    #[must_use]
    #[inline]
    pub fn max_fragment(&self) -> usize {
        self.max_fragment
    }

    #[must_use]
    pub fn stat(&self) -> Stat {
        Stat {
            frames_sent: self.stat.frames_sent,
            retransmissions: self.stat.retransmissions,
            acks: self.stat.acks,
            responses: self.stat.responses,
            duplicates: self.stat.duplicates,
            mismatches: self.stat.mismatches,
            decoding_errors: self.stat.decoding_errors,
            evictions: self.stat.evictions,
            give_ups: self.stat.give_ups,
            outstanding: self.retransmit.len(),
            unclaimed: self.correlator.len(),
            next_seq: self.seq_alloc.next_seq(),
        }
    }

    #[inline]
    pub fn validate(&self, address: u32, len: usize, mode: Mode) -> Result<(), Error> {
        check_transfer(address, len, mode, self.max_fragment)
    }

    pub fn submit_write(
        &mut self,
        id: OpId,
        address: u32,
        data: &[u8],
        mode: Mode,
        now: Instant,
    ) -> Result<(), Error> {
        self.validate(address, data.len(), mode)?;
        assert!(!self.ops.contains_key(&id));
        let queued = split(address, data.len(), self.max_fragment)
            .map(|(address, range)| (address, data[range].to_vec()))
            .collect();
        let op = Op::Write {
            queued,
            in_flight: HashSet::new(),
        };
        self.ops.insert(id, op);
        self.try_finish(id);
        self.pump(now);
        self.check_rep();
        Ok(())
    }

    pub fn submit_read(
        &mut self,
        id: OpId,
        address: u32,
        len: usize,
        mode: Mode,
        now: Instant,
    ) -> Result<(), Error> {
        self.validate(address, len, mode)?;
        assert!(!self.ops.contains_key(&id));
        let queued = split(address, len, self.max_fragment)
            .map(|(address, range)| (address, range.len() as u16))
            .collect();
        let op = Op::Read {
            queued,
            fragments: PendingFragmentSet::new(),
        };
        self.ops.insert(id, op);
        self.try_finish(id);
        self.pump(now);
        self.check_rep();
        Ok(())
    }

    /// Aborts an operation and withdraws all of its outstanding requests.
    ///
    /// Returns `false` if the operation already finished.
    pub fn cancel(&mut self, id: OpId, now: Instant) -> bool {
        if !self.ops.contains_key(&id) {
            return false;
        }
        self.abort(id, Error::Cancelled);
        self.pump(now);
        self.check_rep();
        true
    }

    /// Fails every operation with [`Error::Closed`].
    pub fn close(&mut self) {
        let ids: Vec<OpId> = self.ops.keys().copied().collect();
        for id in ids {
            self.abort(id, Error::Closed);
        }
        self.output.clear();
        self.check_rep();
    }

    pub fn input_frame(&mut self, frame: &[u8], now: Instant) {
        let packet = match self.frame_codec.decode(frame) {
            Ok(x) => x,
            Err(e) => {
                self.stat.decoding_errors += 1;
                warn!("dropping inbound frame: {}", e);
                return;
            }
        };

        match self
            .correlator
            .correlate(packet, &mut self.retransmit, now)
        {
            Ok(Correlated::Acked { seq }) => {
                trace!("ack received for {}", seq);
                self.stat.acks += 1;
                self.on_acked(seq);
            }
            Ok(Correlated::Responded { seq }) => {
                trace!("response received for {}", seq);
                self.stat.responses += 1;
                self.on_responded(seq);
            }
            Err(Ignored::DuplicateOrUnknown { seq }) => {
                trace!("ignoring duplicate or unknown seq {}", seq);
                self.stat.duplicates += 1;
            }
            Err(Ignored::Mismatch { seq }) => {
                warn!("ignoring response that does not match request {}", seq);
                self.stat.mismatches += 1;
            }
            Err(Ignored::NotAResponse { seq }) => {
                debug!("ignoring request-kind packet with seq {}", seq);
                self.stat.mismatches += 1;
            }
        }
        self.pump(now);
        self.check_rep();
    }

    /// Fires due retransmissions and sweeps orphaned responses.
    pub fn handle_timeouts(&mut self, now: Instant) {
        for expired in self.retransmit.poll_expired(now) {
            match expired {
                Expired::Resend { seq, frame } => {
                    debug!("retransmitting {}", seq);
                    self.stat.retransmissions += 1;
                    self.send(frame);
                }
                Expired::GaveUp { seq, waited } => {
                    warn!("giving up on {} after {:?}", seq, waited);
                    self.stat.give_ups += 1;
                    if let Some(id) = self.owners.remove(&seq) {
                        self.abort(id, Error::NoResponse { seq });
                    }
                }
            }
        }

        let owners = &self.owners;
        let evicted = self
            .correlator
            .evict_expired(now, |seq| owners.contains_key(&seq));
        if evicted > 0 {
            debug!("evicted {} unclaimed responses", evicted);
            self.stat.evictions += evicted as u64;
        }

        self.pump(now);
        self.check_rep();
    }

    #[must_use]
    #[inline]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.retransmit.next_deadline()
    }

    #[must_use]
    pub fn pop_output(&mut self) -> Option<Vec<u8>> {
        self.output.pop_front()
    }

    #[must_use]
    pub fn pop_completion(&mut self) -> Option<(OpId, Result<Completion, Error>)> {
        self.completions.pop_front()
    }

    fn on_acked(&mut self, seq: Seq16) {
        let id = match self.owners.remove(&seq) {
            Some(x) => x,
            None => return,
        };
        if let Some(Op::Write { in_flight, .. }) = self.ops.get_mut(&id) {
            in_flight.remove(&seq);
        }
        self.try_finish(id);
    }

    fn on_responded(&mut self, seq: Seq16) {
        let id = match self.owners.get(&seq) {
            Some(&x) => x,
            // left for the ttl sweep
            None => return,
        };
        if let Some(Op::Read { fragments, .. }) = self.ops.get_mut(&id) {
            if let Some(payload) = self.correlator.claim(seq) {
                fragments.fill(seq, payload);
                self.owners.remove(&seq);
            }
        }
        self.try_finish(id);
    }

    fn try_finish(&mut self, id: OpId) {
        match self.ops.get(&id) {
            Some(op) if op.is_done() => (),
            _ => return,
        }
        let completion = match self.ops.remove(&id) {
            Some(Op::Write { .. }) => Completion::Written,
            Some(Op::Read { fragments, .. }) => match fragments.assemble() {
                Some(data) => Completion::Read(data),
                None => return,
            },
            None => return,
        };
        self.completions.push_back((id, Ok(completion)));
    }

    /// Removes `id` and releases every seq it still owns.
    fn abort(&mut self, id: OpId, error: Error) {
        let op = match self.ops.remove(&id) {
            Some(x) => x,
            None => return,
        };
        for seq in op.seqs() {
            if self.owners.get(&seq) != Some(&id) {
                continue;
            }
            self.owners.remove(&seq);
            self.retransmit.cancel(seq);
            self.correlator.discard(seq);
        }
        debug!("operation {} ended: {}", id, error);
        self.completions.push_back((id, Err(error)));
    }

    /// Puts queued fragments on the wire while the windows allow.
    fn pump(&mut self, now: Instant) {
        let mut reads_in_flight: usize = self
            .ops
            .values()
            .map(|op| match op {
                Op::Read { fragments, .. } => fragments.missing(),
                Op::Write { .. } => 0,
            })
            .sum();

        let ids: Vec<OpId> = self.ops.keys().copied().collect();
        for id in ids {
            loop {
                if self.owners.len() >= MAX_SEQS_IN_USE {
                    return;
                }
                let is_read = matches!(self.ops.get(&id), Some(Op::Read { .. }));
                if is_read && reads_in_flight >= self.read_window {
                    break;
                }
                match self.issue_next(id, now) {
                    Ok(true) => {
                        if is_read {
                            reads_in_flight += 1;
                        }
                    }
                    Ok(false) => break,
                    Err(e) => {
                        self.abort(id, e);
                        break;
                    }
                }
            }
        }
    }

    /// Sends the next queued fragment of `id`. Returns `false` once nothing
    /// is left to send.
    fn issue_next(&mut self, id: OpId, now: Instant) -> Result<bool, Error> {
        let owners = &self.owners;
        let retransmit = &self.retransmit;
        let correlator = &self.correlator;
        let in_use = |seq: Seq16| {
            owners.contains_key(&seq) || retransmit.contains(seq) || correlator.contains(seq)
        };

        let (seq, packet, expect) = match self.ops.get_mut(&id) {
            Some(Op::Write { queued, in_flight }) => {
                let (address, payload) = match queued.pop_front() {
                    Some(x) => x,
                    None => return Ok(false),
                };
                let seq = match self.seq_alloc.allocate(in_use) {
                    Some(x) => x,
                    None => {
                        queued.push_front((address, payload));
                        return Ok(false);
                    }
                };
                in_flight.insert(seq);
                let packet = Packet::Write {
                    seq,
                    address,
                    payload,
                };
                (seq, packet, Expect::Ack)
            }
            Some(Op::Read { queued, fragments }) => {
                let (address, len) = match queued.pop_front() {
                    Some(x) => x,
                    None => return Ok(false),
                };
                let seq = match self.seq_alloc.allocate(in_use) {
                    Some(x) => x,
                    None => {
                        queued.push_front((address, len));
                        return Ok(false);
                    }
                };
                fragments.issue(seq);
                let packet = Packet::Read { seq, address, len };
                (seq, packet, Expect::Response { address, len })
            }
            None => return Ok(false),
        };

        self.owners.insert(seq, id);
        let frame = self.frame_codec.encode(&packet)?;
        debug!("transmitting {:?} {}", packet.opcode(), seq);
        self.retransmit
            .register(seq, OutstandingRequest::new(frame.clone(), expect, now));
        self.send(frame);
        Ok(true)
    }

    fn send(&mut self, frame: Vec<u8>) {
        self.stat.frames_sent += 1;
        self.output.push_back(frame);
    }
}

#[derive(Default)]
struct LocalStat {
    frames_sent: u64,
    retransmissions: u64,
    acks: u64,
    responses: u64,
    duplicates: u64,
    mismatches: u64,
    decoding_errors: u64,
    evictions: u64,
    give_ups: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub frames_sent: u64,
    pub retransmissions: u64,
    pub acks: u64,
    pub responses: u64,
    pub duplicates: u64,
    pub mismatches: u64,
    pub decoding_errors: u64,
    pub evictions: u64,
    pub give_ups: u64,
    pub outstanding: usize,
    pub unclaimed: usize,
    pub next_seq: Seq16,
}
