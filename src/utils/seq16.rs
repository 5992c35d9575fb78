use std::{fmt, num::Wrapping};

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Seq16 {
    n: u16,
}

impl Seq16 {
    pub fn from_u16(n: u16) -> Self {
        Seq16 { n }
    }

    pub fn to_u16(&self) -> u16 {
        self.n
    }

    pub fn add_u16(&self, n: u16) -> Seq16 {
        let s = Wrapping(self.n) + Wrapping(n);
        Seq16 { n: s.0 }
    }

    pub fn increment(&mut self) {
        *self = self.add_u16(1);
    }
}

impl fmt::Display for Seq16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.n)
    }
}

/// Hands out correlation ids in increasing order, wrapping at 65536.
///
/// A seq that the caller reports as still in use is skipped so that a
/// wrapped-around id never aliases a request that is still live.
pub struct SeqAllocator {
    next: Seq16,
}

impl SeqAllocator {
    #[must_use]
    pub fn new(start: Seq16) -> Self {
        SeqAllocator { next: start }
    }

    #[must_use]
    #[inline]
    pub fn next_seq(&self) -> Seq16 {
        self.next
    }

    /// Returns `None` only if every one of the 65536 ids is in use.
    #[must_use]
    pub fn allocate(&mut self, in_use: impl Fn(Seq16) -> bool) -> Option<Seq16> {
        for _ in 0..=u16::MAX as u32 {
            let seq = self.next;
            self.next.increment();
            if !in_use(seq) {
                return Some(seq);
            }
        }
        None
    }
}
