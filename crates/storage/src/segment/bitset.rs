//! A hand-rolled word-oriented bitset
//!
//! Backs the per-segment delete-bitmap (`isDel.rs` in `spec.md` §6). Small
//! enough, and specific enough to this one feature, that pulling in a
//! bitmap crate would violate "keep the dependency stack aligned with the
//! teacher" — `stratadb-labs-strata-core` carries no such dependency either.

use serde::{Deserialize, Serialize};

/// A growable bitset, one bit per row slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

impl Bitset {
    /// An empty bitset.
    pub fn new() -> Self {
        Bitset::default()
    }

    /// A bitset with `len` bits, all clear.
    pub fn with_len(len: usize) -> Self {
        Bitset {
            words: vec![0u64; len.div_ceil(64)],
            len,
        }
    }

    /// Number of addressable bits.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if there are no addressable bits.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grow the bitset to cover at least `len` bits, leaving new bits clear.
    pub fn ensure_len(&mut self, len: usize) {
        if len > self.len {
            self.words.resize(len.div_ceil(64), 0);
            self.len = len;
        }
    }

    /// Set bit `index`, growing the bitset if needed.
    pub fn set(&mut self, index: usize) {
        self.ensure_len(index + 1);
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    /// Test bit `index`. Out-of-range bits read as clear.
    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trip() {
        let mut bits = Bitset::with_len(10);
        bits.set(3);
        bits.set(9);
        assert!(bits.get(3));
        assert!(bits.get(9));
        assert!(!bits.get(4));
        assert_eq!(bits.count_ones(), 2);
    }

    #[test]
    fn grows_past_a_word_boundary() {
        let mut bits = Bitset::new();
        bits.set(130);
        assert_eq!(bits.len(), 131);
        assert!(bits.get(130));
        assert!(!bits.get(0));
    }

    #[test]
    fn out_of_range_reads_as_clear() {
        let bits = Bitset::with_len(4);
        assert!(!bits.get(100));
    }
}
