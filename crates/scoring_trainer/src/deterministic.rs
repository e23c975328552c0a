//! Deterministic utilities for reproducible training
//!
//! LCG-based RNG, row hashing and split tie-breaking, so that the same
//! data and seed always produce the same split and the same model.

use std::num::Wrapping;

/// Linear Congruential Generator (glibc constants)
#[derive(Clone, Debug)]
pub struct LcgRng {
    state: Wrapping<u64>,
}

impl LcgRng {
    const MULTIPLIER: u64 = 1_103_515_245;
    const INCREMENT: u64 = 12_345;
    const MODULUS: u64 = 1 << 31;

    pub fn new(seed: u64) -> Self {
        Self {
            state: Wrapping(seed % Self::MODULUS),
        }
    }

    /// Next value in [0, 2^31)
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state * Wrapping(Self::MULTIPLIER) + Wrapping(Self::INCREMENT);
        self.state.0 & (Self::MODULUS - 1)
    }

    /// Next value in [0, max)
    pub fn next_range(&mut self, max: u64) -> u64 {
        if max == 0 {
            return 0;
        }
        self.next_u64() % max
    }

    /// Next value in [0.0, 1.0)
    pub fn next_f64(&mut self) -> f64 {
        self.next_u64() as f64 / Self::MODULUS as f64
    }
}

/// xxhash64-style mix of a few integers, used to order rows reproducibly.
pub fn row_hash(data: &[u64], seed: u64) -> u64 {
    const PRIME1: u64 = 0x9E37_79B1_85EB_CA87;
    const PRIME2: u64 = 0xC2B2_AE3D_27D4_EB4F;
    const PRIME3: u64 = 0x1656_67B1_9E37_79F9;
    const PRIME5: u64 = 0x85EB_CA77_C2B2_AE63;

    let mut h = seed.wrapping_add(PRIME5);
    for &val in data {
        h = h.wrapping_add(val.wrapping_mul(PRIME3));
        h = h.rotate_left(17).wrapping_mul(PRIME2);
    }

    h ^= h >> 33;
    h = h.wrapping_mul(PRIME1);
    h ^= h >> 29;
    h = h.wrapping_mul(PRIME2);
    h ^= h >> 32;
    h
}

/// Deterministic ordering of equal-gain split candidates:
/// lower feature index first, then lower threshold bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SplitTieBreaker {
    pub feature_idx: usize,
    pub bin: usize,
}

impl SplitTieBreaker {
    pub fn new(feature_idx: usize, bin: usize) -> Self {
        Self { feature_idx, bin }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcg_is_reproducible() {
        let mut a = LcgRng::new(42);
        let mut b = LcgRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_lcg_ranges() {
        let mut rng = LcgRng::new(7);
        for _ in 0..200 {
            assert!(rng.next_range(10) < 10);
            let x = rng.next_f64();
            assert!((0.0..1.0).contains(&x));
        }
        assert_eq!(rng.next_range(0), 0);
    }

    #[test]
    fn test_row_hash_depends_on_seed() {
        let data = [1, 2, 3];
        assert_eq!(row_hash(&data, 42), row_hash(&data, 42));
        assert_ne!(row_hash(&data, 42), row_hash(&data, 43));
    }

    #[test]
    fn test_tie_breaker_prefers_lower_feature_then_bin() {
        assert!(SplitTieBreaker::new(0, 5) < SplitTieBreaker::new(1, 0));
        assert!(SplitTieBreaker::new(2, 1) < SplitTieBreaker::new(2, 3));
    }
}
