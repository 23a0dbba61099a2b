//! The three-stage sampling algorithm: level selection by a linear scan over
//! the approximate level weights, an acceptance test restoring exactness when
//! the draw lands in a weight's rounding slack, and rejection sampling against
//! the shifted significands inside the selected level.

use bitm::bits_to_store;
use rand::RngCore;

use crate::arena::{exponent_of_level, Arena, LEVELS};
use crate::levels::shifted_low64;

/// Draws a uniform integer from `[0, bound)` without modulo bias.
fn uniform_below<R: RngCore + ?Sized>(rng: &mut R, bound: u64) -> u64 {
    debug_assert!(bound > 0);
    // widening multiply with rejection of the biased low range (Lemire)
    let mut m = rng.next_u64() as u128 * bound as u128;
    if (m as u64) < bound {
        let threshold = bound.wrapping_neg() % bound;
        while (m as u64) < threshold {
            m = rng.next_u64() as u128 * bound as u128;
        }
    }
    (m >> 64) as u64
}

impl Arena {
    /// Draws an index with probability proportional to its weight, or returns
    /// [`None`] when all weights are zero.
    pub(crate) fn try_sample<R: RngCore + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        let total = self.total();
        if total == 0 { return None; }
        loop {
            let mut x = uniform_below(rng, total) + 1;
            let mut level = self.first_level();
            let mut weight = self.level_weight(level);
            while x > weight {
                x -= weight;
                level += 1;
                debug_assert!(level < LEVELS);
                weight = self.level_weight(level);
            }
            if x == weight && !self.accepts_slack(rng, level) { continue; }
            return Some(self.sample_in_level(rng, level));
        }
    }

    /// Acceptance test for a draw that landed in the rounding slack of a
    /// level's weight. Accepts with probability equal to the fractional part
    /// the truncated weight dropped, comparing successive 64-bit windows of
    /// that fraction against fresh draws until the windows are exhausted.
    fn accepts_slack<R: RngCore + ?Sized>(&self, rng: &mut R, level: usize) -> bool {
        let sum = self.sig_sum(level);
        let shift = self.shift() + exponent_of_level(level) as i64;
        let mut window = 1;
        loop {
            let fraction = shifted_low64(sum, shift + 64 * window);
            let r = rng.next_u64();
            if r != fraction { return r < fraction; }
            if shift + 64 * window >= 0 { return true; }
            window += 1;
        }
    }

    /// Draws a pair from the group of `level`: a uniform slot, accepted with
    /// probability `significand / 2^64`, which is proportional to the pair's
    /// weight within its level.
    fn sample_in_level<R: RngCore + ?Sized>(&self, rng: &mut R, level: usize) -> usize {
        let pos = self.group_pos(level);
        let len = self.group_len(level) as u64;
        debug_assert!(len >= 1);
        let bits = bits_to_store(len - 1);
        loop {
            let slot = (rng.next_u64() >> 1) >> (63 - bits);
            if slot >= len { continue; }
            let off = pos + 2 * slot as usize;
            if rng.next_u64() < self.words[off] {
                return self.words[off + 1] as usize;
            }
        }
    }
}
