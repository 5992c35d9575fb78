use std::{collections::HashMap, ops::Range};

use crate::utils::Seq16;

/// Splits `len` bytes starting at `address` into pieces of at most
/// `max_fragment` bytes.
///
/// Yields the device address of each piece and its byte range within the
/// transfer.
pub fn split(
    address: u32,
    len: usize,
    max_fragment: usize,
) -> impl Iterator<Item = (u32, Range<usize>)> {
    assert!(max_fragment > 0);
    (0..len).step_by(max_fragment).map(move |start| {
        let end = usize::min(start + max_fragment, len);
        (address.wrapping_add(start as u32), start..end)
    })
}

/// The fragments one read has put on the wire, in issue order, and the
/// payloads that have come back for them so far.
pub struct PendingFragmentSet {
    issued: Vec<Seq16>,
    received: HashMap<Seq16, Vec<u8>>,
}

impl PendingFragmentSet {
    fn check_rep(&self) {
        assert!(self.received.len() <= self.issued.len());
    }

    #[must_use]
    pub fn new() -> Self {
        PendingFragmentSet {
            issued: Vec::new(),
            received: HashMap::new(),
        }
    }

    pub fn issue(&mut self, seq: Seq16) {
        self.issued.push(seq);
        self.check_rep();
    }

    /// Returns `false` if `seq` is not a member or was already filled.
    pub fn fill(&mut self, seq: Seq16, payload: Vec<u8>) -> bool {
        if !self.issued.contains(&seq) || self.received.contains_key(&seq) {
            return false;
        }
        self.received.insert(seq, payload);
        self.check_rep();
        true
    }

    #[must_use]
    #[inline]
    pub fn issued(&self) -> &[Seq16] {
        &self.issued
    }

    /// Members still waiting for a response.
    #[must_use]
    #[inline]
    pub fn missing(&self) -> usize {
        self.issued.len() - self.received.len()
    }

    #[must_use]
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.missing() == 0
    }

    /// Concatenates the payloads in issue order.
    ///
    /// Returns `None` while a member is still missing.
    #[must_use]
    pub fn assemble(mut self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let len = self.received.values().map(Vec::len).sum();
        let mut data = Vec::with_capacity(len);
        for seq in &self.issued {
            let payload = self.received.remove(seq)?;
            data.extend_from_slice(&payload);
        }
        Some(data)
    }
}

impl Default for PendingFragmentSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_exact_and_remainder() {
        let pieces: Vec<_> = split(0x100, 10, 4).collect();
        assert_eq!(
            pieces,
            vec![(0x100, 0..4), (0x104, 4..8), (0x108, 8..10)]
        );
    }

    #[test]
    fn split_empty() {
        assert_eq!(split(0, 0, 4).count(), 0);
    }

    #[test]
    fn split_covers_contiguously() {
        let max = 1469;
        for len in [1, max - 1, max, max + 1, 16 * max, 16 * max - 7] {
            let pieces: Vec<_> = split(0x2000, len, max).collect();
            assert_eq!(pieces.len(), (len + max - 1) / max);
            let mut next = 0;
            for (address, range) in pieces {
                assert_eq!(range.start, next);
                assert_eq!(address, 0x2000 + range.start as u32);
                assert!(range.len() <= max);
                assert!(!range.is_empty());
                next = range.end;
            }
            assert_eq!(next, len);
        }
    }

    #[test]
    fn assemble_in_issue_order() {
        let mut set = PendingFragmentSet::new();
        for seq in [5, 6, 7] {
            set.issue(Seq16::from_u16(seq));
        }
        assert!(set.fill(Seq16::from_u16(7), vec![7, 7]));
        assert!(set.fill(Seq16::from_u16(5), vec![5]));
        assert_eq!(set.missing(), 1);
        assert!(set.fill(Seq16::from_u16(6), vec![6, 6, 6]));
        assert!(set.is_complete());
        assert_eq!(set.assemble(), Some(vec![5, 6, 6, 6, 7, 7]));
    }

    #[test]
    fn fill_rejects_strangers_and_duplicates() {
        let mut set = PendingFragmentSet::new();
        set.issue(Seq16::from_u16(1));
        assert!(!set.fill(Seq16::from_u16(2), vec![0]));
        assert!(set.fill(Seq16::from_u16(1), vec![1]));
        assert!(!set.fill(Seq16::from_u16(1), vec![9]));
        assert_eq!(set.assemble(), Some(vec![1]));
    }

    #[test]
    fn assemble_incomplete() {
        let mut set = PendingFragmentSet::new();
        set.issue(Seq16::from_u16(1));
        assert_eq!(set.assemble(), None);
    }
}
