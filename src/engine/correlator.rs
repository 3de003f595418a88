//! Sign-bit similarity search used to find splice points.

use assume::assume;

// -------------------------------------------------------------------------------------------------

/// Finds where a short source region best matches within a wider destination region.
///
/// Both regions get reduced to their sign bits, packed MSB first into 32-bit words. A candidate
/// is a bit offset into the destination; its score is the number of equal sign bits between the
/// source and the destination shifted by that offset. The search is spread across several calls
/// of [`Self::evaluate_some_candidates`], so it never has to complete within a single block.
///
/// Packed regions are sampled with a fixed-point (Q16) rate, so a search can run on pitched
/// material. [`Self::best_match`] maps the winning candidate back to a position with the same
/// rate.
#[derive(Debug, Clone)]
pub struct Correlator {
    source: Box<[u32]>,
    destination: Box<[u32]>,
    size: usize,
    offset: i64,
    increment: u32,
    candidate: usize,
    best_score: u32,
    best_candidate: usize,
    done: bool,
}

impl Correlator {
    /// Number of sign bits per packed word.
    pub const WORD_BITS: usize = 32;

    /// Q16 increment for a rate of 1.0.
    pub const UNITY_INCREMENT: u32 = 1 << 16;

    /// Create a correlator for searches of up to `max_size` source samples.
    pub fn new(max_size: usize) -> Self {
        let max_words = max_size.div_ceil(Self::WORD_BITS).max(1);
        Self {
            source: vec![0; max_words].into_boxed_slice(),
            // twice the source width plus one spare word for the shifted reads
            destination: vec![0; 2 * max_words + 1].into_boxed_slice(),
            size: 0,
            offset: 0,
            increment: Self::UNITY_INCREMENT,
            candidate: 0,
            best_score: 0,
            best_candidate: 0,
            done: true,
        }
    }

    /// Max number of source samples a search can use.
    pub fn max_size(&self) -> usize {
        self.source.len() * Self::WORD_BITS
    }

    /// Round a sample count to a valid search size: a multiple of the word size, at least one
    /// word and at most [`Self::max_size`].
    pub fn search_size(&self, samples: usize) -> usize {
        (samples / Self::WORD_BITS * Self::WORD_BITS).clamp(Self::WORD_BITS, self.max_size())
    }

    /// Convert a (positive) rate to the Q16 increment used for packing and matching.
    pub fn increment_from_rate(rate: f64) -> u32 {
        if rate.is_finite() && rate > 0.0 {
            (rate * Self::UNITY_INCREMENT as f64).round().clamp(1.0, u32::MAX as f64) as u32
        } else {
            Self::UNITY_INCREMENT
        }
    }

    /// Pack the sign bits of `size` source samples. `sample(i)` yields the i-th sample.
    pub fn pack_source(&mut self, size: usize, sample: impl FnMut(usize) -> f32) {
        let size = self.search_size(size);
        Self::pack(&mut self.source[..size / Self::WORD_BITS], sample);
    }

    /// Pack the sign bits of `2 * size` destination samples. `sample(i)` yields the i-th sample.
    pub fn pack_destination(&mut self, size: usize, sample: impl FnMut(usize) -> f32) {
        let size = self.search_size(size);
        let words = 2 * size / Self::WORD_BITS;
        Self::pack(&mut self.destination[..words], sample);
        self.destination[words] = 0;
    }

    fn pack(words: &mut [u32], mut sample: impl FnMut(usize) -> f32) {
        for (word_index, word) in words.iter_mut().enumerate() {
            let mut bits = 0_u32;
            let base = word_index * Self::WORD_BITS;
            for bit in 0..Self::WORD_BITS {
                bits <<= 1;
                if sample(base + bit) > 0.0 {
                    bits |= 1;
                }
            }
            *word = bits;
        }
    }

    /// Reset the search state for a new search over packed regions of `size` source samples.
    /// `offset` is the position of the first destination sample, `increment` the Q16 rate the
    /// regions got packed with.
    pub fn start_search(&mut self, size: usize, offset: i64, increment: u32) {
        self.size = self.search_size(size);
        self.offset = offset;
        self.increment = increment.max(1);
        self.candidate = 0;
        self.best_score = 0;
        self.best_candidate = self.size / 2;
        self.done = false;
    }

    /// True when all candidates of the current search got evaluated.
    #[inline]
    pub fn done(&self) -> bool {
        self.done
    }

    /// Score of the best candidate so far: number of matching sign bits.
    pub fn best_score(&self) -> u32 {
        self.best_score
    }

    /// Candidate (destination bit offset) which matched best so far.
    pub fn best_candidate(&self) -> usize {
        self.best_candidate
    }

    /// Position of the best match so far.
    pub fn best_match(&self) -> i64 {
        self.offset + ((self.best_candidate as u64 * self.increment as u64) >> 16) as i64
    }

    /// Evaluate a single candidate. Returns false when the search is done.
    pub fn evaluate_next_candidate(&mut self) -> bool {
        if self.done {
            return false;
        }
        let words = self.size / Self::WORD_BITS;
        let word_shift = self.candidate / Self::WORD_BITS;
        let bit_shift = self.candidate % Self::WORD_BITS;

        let source = &self.source[..words];
        let destination = &self.destination[word_shift..];
        assume!(unsafe: destination.len() > words, "Destination holds 2 * words + 1 words");

        let mut score = 0;
        if bit_shift == 0 {
            for (s, d) in source.iter().zip(destination) {
                score += count_bits(!(s ^ d));
            }
        } else {
            for (i, s) in source.iter().enumerate() {
                let d = destination[i] << bit_shift
                    | destination[i + 1] >> (Self::WORD_BITS - bit_shift);
                score += count_bits(!(s ^ d));
            }
        }
        if score > self.best_score {
            self.best_score = score;
            self.best_candidate = self.candidate;
        }
        self.candidate += 1;
        self.done = self.candidate >= self.size;
        !self.done
    }

    /// Evaluate a bounded batch of candidates: `size / 16 + 16` per call.
    pub fn evaluate_some_candidates(&mut self) {
        let count = (self.size >> 4) + 16;
        for _ in 0..count {
            if !self.evaluate_next_candidate() {
                break;
            }
        }
    }

    /// Run the remaining search at once.
    pub fn finish(&mut self) {
        while self.evaluate_next_candidate() {}
    }
}

// -------------------------------------------------------------------------------------------------

/// Population count via parallel bit summation.
#[inline(always)]
fn count_bits(value: u32) -> u32 {
    let value = value - ((value >> 1) & 0x5555_5555);
    let value = (value & 0x3333_3333) + ((value >> 2) & 0x3333_3333);
    let value = (value + (value >> 4)) & 0x0F0F_0F0F;
    value.wrapping_mul(0x0101_0101) >> 24
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;

    fn noise(len: usize, seed: u64) -> Vec<f32> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..len).map(|_| rng.random::<f32>() - 0.5).collect()
    }

    #[test]
    fn bit_count() {
        let mut rng = SmallRng::seed_from_u64(1);
        for value in [0, 1, u32::MAX, 0x8000_0001, 0xF0F0_F0F0] {
            assert_eq!(count_bits(value), value.count_ones());
        }
        for _ in 0..1000 {
            let value = rng.random::<u32>();
            assert_eq!(count_bits(value), value.count_ones());
        }
    }

    #[test]
    fn finds_exact_shift() {
        let size = 256;
        for shift in [0, 1, 31, 32, 100, 200, 255] {
            let signal = noise(3 * size, shift as u64 + 10);
            let mut correlator = Correlator::new(size);
            correlator.pack_source(size, |i| signal[shift + i]);
            correlator.pack_destination(size, |i| signal[i]);
            correlator.start_search(size, 1000, Correlator::UNITY_INCREMENT);
            let mut calls = 0;
            while !correlator.done() {
                correlator.evaluate_some_candidates();
                calls += 1;
            }
            // amortized across several calls
            assert!(calls > 1);
            assert_eq!(correlator.best_candidate(), shift, "shift {shift}");
            assert_eq!(correlator.best_match(), 1000 + shift as i64);
            assert_eq!(correlator.best_score(), size as u32);
        }
    }

    #[test]
    fn maps_matches_with_rate() {
        let size = 128;
        let rate = 2.0;
        let increment = Correlator::increment_from_rate(rate);
        assert_eq!(increment, 2 << 16);
        let signal = noise(1024, 7);
        let shift = 70; // in packed (resampled) samples
        let mut correlator = Correlator::new(size);
        correlator.pack_source(size, |i| signal[(shift + i) * 2]);
        correlator.pack_destination(size, |i| signal[i * 2]);
        correlator.start_search(size, -50, increment);
        correlator.finish();
        assert_eq!(correlator.best_candidate(), shift);
        assert_eq!(correlator.best_match(), -50 + 140);
    }

    #[test]
    fn search_sizes() {
        let correlator = Correlator::new(1000);
        assert_eq!(correlator.max_size(), 1024);
        assert_eq!(correlator.search_size(1), 32);
        assert_eq!(correlator.search_size(100), 96);
        assert_eq!(correlator.search_size(5000), 1024);
        assert_eq!(Correlator::increment_from_rate(f64::NAN), 1 << 16);
    }

    #[test]
    fn done_search_is_stable() {
        let mut correlator = Correlator::new(64);
        assert!(correlator.done());
        assert!(!correlator.evaluate_next_candidate());
        correlator.start_search(64, 0, Correlator::UNITY_INCREMENT);
        assert!(!correlator.done());
        correlator.finish();
        assert!(correlator.done());
        // all zero regions: every candidate scores the full size, the first one wins
        assert_eq!(correlator.best_candidate(), 0);
    }
}
