use std::{
    cmp::Reverse,
    collections::HashMap,
    time::{Duration, Instant},
};

use keyed_priority_queue::KeyedPriorityQueue;
use serde::{Deserialize, Serialize};

use crate::utils::Seq16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// Resend until the request is answered or cancelled.
    Unbounded,
    /// Give up after this many resends.
    Limited { max_retransmissions: u32 },
}

/// What a request is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Ack,
    Response { address: u32, len: u16 },
}

pub struct OutstandingRequest {
    frame: Vec<u8>,
    expect: Expect,
    created: Instant,
    last_sent: Instant,
    retransmissions: u32,
}

impl OutstandingRequest {
    #[must_use]
    pub fn new(frame: Vec<u8>, expect: Expect, now: Instant) -> Self {
        OutstandingRequest {
            frame,
            expect,
            created: now,
            last_sent: now,
            retransmissions: 0,
        }
    }

    #[must_use]
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    #[must_use]
    pub fn expect(&self) -> Expect {
        self.expect
    }

    #[must_use]
    pub fn created(&self) -> Instant {
        self.created
    }

    #[must_use]
    pub fn retransmissions(&self) -> u32 {
        self.retransmissions
    }

    pub fn to_retransmit(&mut self, now: Instant) {
        self.last_sent = now;
        self.retransmissions += 1;
    }
}

/// Outcome of one due timer.
#[derive(Debug, PartialEq, Eq)]
pub enum Expired {
    Resend { seq: Seq16, frame: Vec<u8> },
    GaveUp { seq: Seq16, waited: Duration },
}

/// Owns every request that has been sent and not yet answered, along with
/// its resend timer.
///
/// An entry leaves the table exactly once, through either [`Self::complete`]
/// or [`Self::cancel`]. Timers are only honoured while their seq is still
/// in the table.
pub struct RetransmissionManager {
    outstanding: HashMap<Seq16, OutstandingRequest>,
    timers: KeyedPriorityQueue<Seq16, Reverse<Instant>>,
    rtd: Duration,
    policy: RetryPolicy,
}

impl RetransmissionManager {
    fn check_rep(&self) {
        assert!(self.timers.len() <= self.outstanding.len());
    }

    #[must_use]
    pub fn new(rtd: Duration, policy: RetryPolicy) -> Self {
        let this = RetransmissionManager {
            outstanding: HashMap::new(),
            timers: KeyedPriorityQueue::new(),
            rtd,
            policy,
        };
        this.check_rep();
        this
    }

    #[must_use]
    #[inline]
    pub fn rtd(&self) -> Duration {
        self.rtd
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    #[must_use]
    #[inline]
    pub fn contains(&self, seq: Seq16) -> bool {
        self.outstanding.contains_key(&seq)
    }

    #[must_use]
    #[inline]
    pub fn get(&self, seq: Seq16) -> Option<&OutstandingRequest> {
        self.outstanding.get(&seq)
    }

    /// Registers a request that has just been put on the wire.
    pub fn register(&mut self, seq: Seq16, request: OutstandingRequest) {
        assert!(!self.outstanding.contains_key(&seq));
        let deadline = request.last_sent + self.rtd;
        self.outstanding.insert(seq, request);
        self.timers.push(seq, Reverse(deadline));
        self.check_rep();
    }

    /// `Sent -> Acked`
    pub fn complete(&mut self, seq: Seq16) -> Option<OutstandingRequest> {
        self.remove(seq)
    }

    /// `Sent -> Cancelled`
    pub fn cancel(&mut self, seq: Seq16) -> Option<OutstandingRequest> {
        self.remove(seq)
    }

    fn remove(&mut self, seq: Seq16) -> Option<OutstandingRequest> {
        let request = self.outstanding.remove(&seq);
        self.timers.remove(&seq);
        self.check_rep();
        request
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|(_, Reverse(deadline))| *deadline)
    }

    /// Fires every timer due at `now`.
    ///
    /// A resent request is rescheduled `rtd` after `now`.
    #[must_use]
    pub fn poll_expired(&mut self, now: Instant) -> Vec<Expired> {
        let mut expired = Vec::new();
        loop {
            match self.timers.peek() {
                Some((_, Reverse(deadline))) if *deadline <= now => (),
                _ => break,
            }
            let (seq, _) = match self.timers.pop() {
                Some(x) => x,
                None => break,
            };
            let request = match self.outstanding.get_mut(&seq) {
                Some(x) => x,
                // already answered or cancelled
                None => continue,
            };
            if let RetryPolicy::Limited {
                max_retransmissions,
            } = self.policy
            {
                if request.retransmissions >= max_retransmissions {
                    let waited = now.duration_since(request.created);
                    self.outstanding.remove(&seq);
                    expired.push(Expired::GaveUp { seq, waited });
                    continue;
                }
            }
            request.to_retransmit(now);
            expired.push(Expired::Resend {
                seq,
                frame: request.frame.clone(),
            });
            self.timers.push(seq, Reverse(now + self.rtd));
        }
        self.check_rep();
        expired
    }
}
