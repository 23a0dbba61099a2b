//! Exponent-level bookkeeping: exact 128-bit significand sums, the 64-bit
//! approximate level weights derived from them by the global shift, and the
//! shift adjustments that keep the total in `[2^32, 2^64)` whenever nonzero.

use crate::arena::{exponent_of_level, level_of_exponent, Arena, LEVELS, NO_LEVEL};
use crate::{exponent_bits, shifted_significand};

/// Lower bound of a nonzero total.
pub(crate) const MIN_TOTAL: u64 = 1 << 32;

/// Bit length a renormalization gives to the largest level sum after shifting.
const RENORM_BITS: i64 = 48;

/// Number of significant bits of `x`.
#[inline(always)] pub(crate) fn bit_length(x: u128) -> i64 { (128 - x.leading_zeros()) as i64 }

/// Low 64 bits of `x << sh` (an arithmetic left shift by the signed `sh`).
#[inline] pub(crate) fn shifted_low64(x: u128, sh: i64) -> u64 {
    if sh >= 128 || sh <= -128 { 0 }
    else if sh >= 0 { (x << sh) as u64 }
    else { (x >> -sh) as u64 }
}

/// Approximate weight of a level with significand sum `sum != 0` under the
/// shift `sh`: the truncated shifted sum plus one, an upper bound of the exact
/// value that never reaches zero.
#[inline] fn approx_weight(sum: u128, sh: i64) -> u128 {
    debug_assert!(sum != 0);
    shifted_low64(sum, sh) as u128 + 1
}

impl Arena {
    /// Weight currently stored at `index`, `0.0` when absent.
    pub(crate) fn weight(&self, index: usize) -> f64 {
        let pos = self.edit_pos(index);
        if pos == 0 { return 0.0; }
        crate::compose_weight(self.edit_exp(index), self.words[pos])
    }

    /// Inserts `weight` (a positive normal double) at the absent `index`.
    pub(crate) fn insert_weight(&mut self, index: usize, weight: f64) {
        debug_assert_eq!(self.edit_pos(index), 0);
        let exponent = exponent_bits(weight);
        let sig = shifted_significand(weight);
        let level = level_of_exponent(exponent);
        let exponent = exponent as i64;
        if self.total() == 0 {
            // the first weight lands at 40 bits, leaving room in both directions
            self.set_shift(-24 - exponent);
        }
        loop {
            let shift = self.shift();
            let new_sum = self.sig_sum(level) + sig as u128;
            if bit_length(new_sum) + exponent + shift > 64 {
                // the level alone would overflow its 64-bit weight
                self.rescale(RENORM_BITS - bit_length(new_sum) - exponent);
                continue;
            }
            let new_weight = approx_weight(new_sum, shift + exponent);
            let total = self.total() as u128 - self.level_weight(level) as u128 + new_weight;
            if total > u64::MAX as u128 {
                self.rescale(shift - 16);
                continue;
            }
            self.set_sig_sum(level, new_sum);
            self.set_level_weight(level, new_weight as u64);
            self.set_total(total as u64);
            break;
        }
        let pos = self.push_element(level, sig, index);
        self.set_edit_pos(index, pos);
        self.set_edit_exp(index, exponent as u64);
        if level < self.first_level() { self.set_first_level(level); }
    }

    /// Removes the weight at `index`, if any. Returns whether one was present.
    pub(crate) fn clear_weight(&mut self, index: usize) -> bool {
        let pos = self.edit_pos(index);
        if pos == 0 { return false; }
        let exponent = self.edit_exp(index);
        let level = level_of_exponent(exponent);
        let new_sum = self.sig_sum(level) - self.words[pos] as u128;
        let new_weight = if new_sum == 0 { 0 } else {
            approx_weight(new_sum, self.shift() + exponent as i64) as u64
        };
        self.set_total(self.total() - self.level_weight(level) + new_weight);
        self.set_sig_sum(level, new_sum);
        self.set_level_weight(level, new_weight);
        self.remove_element(level, pos);
        self.set_edit_pos(index, 0);
        self.set_edit_exp(index, 0);
        if new_sum == 0 && level == self.first_level() {
            self.advance_first_level();
        }
        let total = self.total();
        if total != 0 && total < MIN_TOTAL { self.reinflate(); }
        true
    }

    /// Moves the first-nonempty mark forward to the next level with a nonzero
    /// sum, or to the empty sentinel.
    fn advance_first_level(&mut self) {
        let mut level = self.first_level();
        while level < LEVELS && self.sig_sum(level) == 0 { level += 1; }
        self.set_first_level(if level == LEVELS { NO_LEVEL } else { level });
    }

    /// Chooses a shift that lifts the largest level back to [`RENORM_BITS`]
    /// significant bits. Only levels whose exponent is within 64 of the first
    /// nonempty one can carry the maximum, since sums span less than 128 bits.
    fn reinflate(&mut self) {
        let first = self.first_level();
        debug_assert!(first < LEVELS);
        let mut largest = 0;
        for level in first..LEVELS.min(first + 65) {
            let sum = self.sig_sum(level);
            if sum != 0 {
                largest = largest.max(bit_length(sum) + exponent_of_level(level) as i64);
            }
        }
        self.rescale(RENORM_BITS - largest);
    }

    /// Changes the global shift to `new_shift`, recomputing the weights and the
    /// total over the affected level range. Levels whose shifted sum is zero
    /// under both the old and the new shift keep their stored weight, which
    /// bounds the sweep to roughly 128 levels past the first nonempty one.
    fn rescale(&mut self, new_shift: i64) {
        let old_shift = self.shift();
        self.set_shift(new_shift);
        let first = self.first_level();
        if first == NO_LEVEL { return; }
        // a level's shifted sum can be nonzero only if exponent + shift > -128
        let bound = 2173 + old_shift.max(new_shift);
        if bound <= first as i64 { return; }
        let last = (LEVELS - 1).min(bound as usize - 1);
        let mut total = self.total() as u128;
        for level in first..=last {
            let sum = self.sig_sum(level);
            if sum == 0 { continue; }
            let new_weight = approx_weight(sum, new_shift + exponent_of_level(level) as i64);
            debug_assert!(new_weight <= u64::MAX as u128);
            total = total - self.level_weight(level) as u128 + new_weight;
            self.set_level_weight(level, new_weight as u64);
        }
        debug_assert!(total <= u64::MAX as u128);
        self.set_total(total as u64);
    }

    /// Recomputes all sums, weights, the total and the first-nonempty mark from
    /// the groups and the edit map, and checks them against the stored values
    /// together with the structural arena invariants. Panics on any mismatch.
    pub(crate) fn verify(&self) {
        let len = self.len();
        assert!(len <= self.capacity(), "length {len} exceeds capacity {}", self.capacity());
        let shift = self.shift();
        let mut total = 0u128;
        let mut first = NO_LEVEL;
        let mut elements = 0usize;
        for level in 0..LEVELS {
            let group_len = self.group_len(level);
            if self.alloc_code(level) == 0 {
                assert_eq!(group_len, 0, "unallocated level {level} has length {group_len}");
            } else {
                assert!(group_len <= self.group_capacity(level),
                    "level {level} length {group_len} exceeds capacity {}", self.group_capacity(level));
            }
            let pos = self.group_pos(level);
            let mut sum = 0u128;
            for i in 0..group_len {
                let sig = self.words[pos + 2 * i];
                let index = self.words[pos + 2 * i + 1];
                assert!(index >= 1 && index <= len as u64, "level {level} refers to index {index}");
                assert!(sig >= 1 << 63, "level {level} holds significand {sig:x} without its top bit");
                assert_eq!(self.edit_pos(index as usize), pos + 2 * i,
                    "index {index} does not point back at its pair in level {level}");
                assert_eq!(level_of_exponent(self.edit_exp(index as usize)), level,
                    "index {index} is recorded under a different exponent than level {level}");
                sum += sig as u128;
            }
            assert_eq!(self.sig_sum(level), sum, "stored significand sum of level {level} is stale");
            let weight = self.level_weight(level);
            if sum == 0 {
                assert_eq!(weight, 0, "empty level {level} has weight {weight}");
            } else {
                assert_eq!(weight as u128, approx_weight(sum, shift + exponent_of_level(level) as i64),
                    "stored weight of level {level} is stale");
                if first == NO_LEVEL { first = level; }
            }
            total += weight as u128;
            elements += group_len;
        }
        assert_eq!(self.total() as u128, total, "stored total is stale");
        assert!(self.total() == 0 || self.total() >= MIN_TOTAL,
            "nonzero total {} below 2^32", self.total());
        assert_eq!(self.first_level(), first, "stored first-nonempty level is stale");
        let mut live = 0usize;
        for index in 1..=len {
            let pos = self.edit_pos(index);
            if pos == 0 { continue; }
            live += 1;
            let level = level_of_exponent(self.edit_exp(index));
            let group_pos = self.group_pos(level);
            assert!(pos >= group_pos && pos < group_pos + 2 * self.group_len(level) && (pos - group_pos) % 2 == 0,
                "index {index} points outside its group");
            assert_eq!(self.words[pos + 1] as usize, index, "index {index} points at a foreign pair");
        }
        for index in len + 1..=self.capacity() {
            assert_eq!(self.edit_pos(index), 0, "index {index} beyond the length has a weight");
        }
        assert_eq!(live, elements, "edit map and group lengths disagree");
        let mut regions: Vec<(usize, usize)> = (0..LEVELS)
            .filter(|&level| self.alloc_code(level) != 0)
            .map(|level| (self.group_pos(level), self.group_capacity(level)))
            .collect();
        regions.sort_unstable();
        let mut end = self.tail_start();
        for (pos, capacity) in regions {
            assert!(pos >= end, "group regions overlap at {pos}");
            end = pos + 2 * capacity;
        }
        assert!(end <= self.free() && self.free() <= self.words.len(), "groups spill past the free pointer");
    }
}
