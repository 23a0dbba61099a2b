#![doc = include_str!("../README.md")]

mod arena;
mod levels;
mod sample;

use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;

use bitm::n_lowest_bits;
use dyn_size_of::GetSize;
use fsum::FSum;
use rand::RngCore;

use arena::{Arena, LEVELS};

/// Largest logical index the samplers support.
const MAX_INDEX: u64 = (1 << 63) - 1;

/// Raw biased exponent bits of the positive finite `weight`.
#[inline(always)] pub(crate) fn exponent_bits(weight: f64) -> u64 { weight.to_bits() >> 52 }

/// 64-bit shifted significand of a positive normal double: the implicit
/// leading one in the top bit, the 52 mantissa bits below it, zeros at the
/// bottom. A uniform 64-bit draw is below this value with probability
/// proportional to the weight among the weights sharing its exponent.
#[inline] pub(crate) fn shifted_significand(weight: f64) -> u64 {
    (1 << 63) | ((weight.to_bits() & n_lowest_bits(52)) << 11)
}

/// Reassembles the double with the given biased exponent and shifted significand.
#[inline] pub(crate) fn compose_weight(exponent: u64, sig: u64) -> f64 {
    f64::from_bits((exponent << 52) | ((sig >> 11) & n_lowest_bits(52)))
}

/// `true` for weights in the supported nonzero domain: positive, finite, normal.
#[inline] fn valid_weight(weight: f64) -> bool {
    weight >= f64::MIN_POSITIVE && weight <= f64::MAX
}

/// Argument-validation error of the sampler operations. The erring operation
/// leaves the sampler unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// The index is outside `1..=len`.
    IndexOutOfBounds { index: usize, len: usize },
    /// The weight is NaN, infinite, negative, or a nonzero subnormal.
    InvalidWeight { weight: f64 },
    /// The resize policy forbids the requested length.
    NotResizable { requested: usize, capacity: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IndexOutOfBounds { index, len } =>
                write!(f, "index {index} is out of bounds of [1, {len}]"),
            Error::InvalidWeight { weight } =>
                write!(f, "weight {weight} is outside the domain of finite non-negative normal doubles"),
            Error::NotResizable { requested, capacity } =>
                write!(f, "cannot resize to length {requested}: the storage policy allows at most {capacity} indices"),
        }
    }
}

impl std::error::Error for Error {}

/// Decides whether [`Sampler::resize`] may change the logical length.
pub trait ResizePolicy {
    /// Whether the length `new_len` is acceptable for a sampler whose arena
    /// was allocated for `capacity` indices.
    fn allows(new_len: usize, capacity: usize) -> bool;
}

/// Resize policy that refuses any length change.
#[derive(Clone, Copy)]
pub struct Fixed;

/// Resize policy that accepts lengths up to the initially allocated capacity.
#[derive(Clone, Copy)]
pub struct SemiResizable;

/// Resize policy without restrictions (the default); growing past the
/// allocated capacity rebuilds the arena.
#[derive(Clone, Copy)]
pub struct Resizable;

impl ResizePolicy for Fixed {
    #[inline(always)] fn allows(_new_len: usize, _capacity: usize) -> bool { false }
}
impl ResizePolicy for SemiResizable {
    #[inline(always)] fn allows(new_len: usize, capacity: usize) -> bool { new_len <= capacity }
}
impl ResizePolicy for Resizable {
    #[inline(always)] fn allows(_new_len: usize, _capacity: usize) -> bool { true }
}

/// Dynamic sampler from a discrete distribution with mutable weights.
///
/// Maps the indices `1..=len` to non-negative `f64` weights and draws an index
/// with probability exactly proportional to its current weight. Both updates
/// and draws take *O(1)* expected time, independently of the number of
/// distinct weights, and the sampled distribution is bit-exact regardless of
/// the update history, as all bookkeeping is integer arithmetic on
/// significands grouped by binary exponent.
///
/// The type parameter selects the [`ResizePolicy`]; see also the
/// [`FixedSampler`] and [`SemiResizableSampler`] aliases.
///
/// # Example
///
/// ```
/// use dds::Sampler;
/// use rand::SeedableRng;
///
/// let mut s = Sampler::new(2);
/// s.set(1, 0.5);
/// s.set(2, 1e300);
/// let mut rng = rand_pcg::Pcg64Mcg::seed_from_u64(0);
/// assert_eq!(s.sample(&mut rng), 2);   // index 1 is negligible next to 1e300
/// s.set(2, 0.0);
/// assert_eq!(s.sample(&mut rng), 1);
/// ```
pub struct Sampler<P: ResizePolicy = Resizable> {
    arena: Arena,
    policy: PhantomData<P>
}

/// Sampler whose length is fixed at construction.
pub type FixedSampler = Sampler<Fixed>;

/// Sampler resizable within its initially allocated capacity.
pub type SemiResizableSampler = Sampler<SemiResizable>;

impl Sampler {
    /// Constructs a resizable sampler of logical length `capacity`, all
    /// weights zero.
    ///
    /// # Example
    ///
    /// ```
    /// let s = dds::Sampler::new(3);
    /// assert_eq!(s.len(), 3);
    /// assert_eq!(s.get(2), 0.0);
    /// ```
    #[inline] pub fn new(capacity: usize) -> Self { Self::new_p(capacity) }
}

impl<P: ResizePolicy> Sampler<P> {
    /// Constructs a sampler with a custom resize policy, of logical length
    /// `capacity`, all weights zero.
    pub fn new_p(capacity: usize) -> Self {
        assert!(capacity as u64 <= MAX_INDEX, "capacity {capacity} exceeds the supported maximum of 2^63-1");
        Self { arena: Arena::new(capacity), policy: PhantomData }
    }

    /// Returns the logical length: indices `1..=len` can hold weights.
    #[inline] pub fn len(&self) -> usize { self.arena.len() }

    /// Returns whether the logical length is zero.
    #[inline] pub fn is_empty(&self) -> bool { self.arena.len() == 0 }

    /// Returns the number of indices the arena was allocated for; the bound of
    /// [`SemiResizable`] resizing.
    #[inline] pub fn capacity(&self) -> usize { self.arena.capacity() }

    /// Returns the number of indices with nonzero weight.
    pub fn active_len(&self) -> usize {
        (0..LEVELS).map(|level| self.arena.group_len(level)).sum()
    }

    /// Returns the weight of `index`, or [`None`] if `index` is out of bounds.
    #[inline] pub fn try_get(&self, index: usize) -> Option<f64> {
        (1..=self.len()).contains(&index).then(|| self.arena.weight(index))
    }

    /// Returns the weight of `index`: the value of the latest `set`, bit-exact,
    /// or `0.0` if none. Panics if `index` is out of bounds.
    #[inline] pub fn get(&self, index: usize) -> f64 {
        self.try_get(index).unwrap_or_else(|| panic!("index {index} is out of bounds of [1, {}]", self.len()))
    }

    /// Sets the weight of `index` to `weight`. `0.0` removes the index from
    /// the distribution; other weights must be positive, finite and normal.
    /// On error the sampler is unchanged.
    pub fn try_set(&mut self, index: usize, weight: f64) -> Result<(), Error> {
        if index < 1 || index > self.len() {
            return Err(Error::IndexOutOfBounds { index, len: self.len() });
        }
        if weight == 0.0 {
            self.arena.clear_weight(index);
            return Ok(());
        }
        if !valid_weight(weight) { return Err(Error::InvalidWeight { weight }); }
        self.arena.clear_weight(index);
        self.arena.insert_weight(index, weight);
        Ok(())
    }

    /// Sets the weight of `index` to `weight`; `0.0` removes the index from
    /// the distribution. Panics where [`Self::try_set`] errors.
    ///
    /// # Example
    ///
    /// ```
    /// let mut s = dds::Sampler::new(2);
    /// s.set(1, 6.02e23);
    /// assert_eq!(s.get(1), 6.02e23);
    /// s.set(1, 0.0);
    /// assert_eq!(s.get(1), 0.0);
    /// ```
    #[inline] pub fn set(&mut self, index: usize, weight: f64) {
        if let Err(e) = self.try_set(index, weight) { panic!("{e}"); }
    }

    /// Changes the logical length to `new_len`, subject to the resize policy.
    /// Shrinking zeroes the weights of all indices beyond the new length.
    pub fn try_resize(&mut self, new_len: usize) -> Result<(), Error> {
        assert!(new_len as u64 <= MAX_INDEX, "length {new_len} exceeds the supported maximum of 2^63-1");
        if !P::allows(new_len, self.arena.capacity()) {
            return Err(Error::NotResizable { requested: new_len, capacity: self.arena.capacity() });
        }
        let len = self.len();
        if new_len < len {
            for index in new_len + 1..=len { self.arena.clear_weight(index); }
        } else if new_len > self.arena.capacity() {
            self.arena.grow_capacity(new_len.max(2 * self.arena.capacity()));
        }
        self.arena.set_len(new_len);
        Ok(())
    }

    /// Changes the logical length to `new_len`; panics where
    /// [`Self::try_resize`] errors.
    #[inline] pub fn resize(&mut self, new_len: usize) {
        if let Err(e) = self.try_resize(new_len) { panic!("{e}"); }
    }

    /// Sets the weight of `index`, growing the length to `index` first if it
    /// is beyond the current one (subject to the resize policy).
    pub fn try_insert(&mut self, index: usize, weight: f64) -> Result<(), Error> {
        if weight != 0.0 && !valid_weight(weight) { return Err(Error::InvalidWeight { weight }); }
        if index > self.len() { self.try_resize(index)?; }
        self.try_set(index, weight)
    }

    /// Sets the weight of `index`, growing the length to `index` first if
    /// needed. Panics where [`Self::try_insert`] errors.
    ///
    /// # Example
    ///
    /// ```
    /// let mut s = dds::Sampler::new(0);
    /// s.insert(7, 1.5);
    /// assert_eq!(s.len(), 7);
    /// assert_eq!(s.get(7), 1.5);
    /// ```
    #[inline] pub fn insert(&mut self, index: usize, weight: f64) {
        if let Err(e) = self.try_insert(index, weight) { panic!("{e}"); }
    }

    /// Zeroes the weight of `index`, which must be nonzero.
    pub fn try_remove(&mut self, index: usize) -> Result<(), Error> {
        if index < 1 || index > self.len() {
            return Err(Error::IndexOutOfBounds { index, len: self.len() });
        }
        if !self.arena.clear_weight(index) {
            return Err(Error::InvalidWeight { weight: 0.0 });
        }
        Ok(())
    }

    /// Zeroes the weight of `index`, which must be nonzero. Panics where
    /// [`Self::try_remove`] errors.
    #[inline] pub fn remove(&mut self, index: usize) {
        if let Err(e) = self.try_remove(index) { panic!("{e}"); }
    }

    /// Sets `weights[i]` at `indices[i]` for all `i`, growing the length to
    /// the largest index if needed. Validates all arguments up front: on error
    /// the sampler is unchanged. Panics if the slices differ in length.
    pub fn try_insert_many(&mut self, indices: &[usize], weights: &[f64]) -> Result<(), Error> {
        assert_eq!(indices.len(), weights.len(), "insert_many requires as many weights as indices");
        let mut target_len = self.len();
        for (&index, &weight) in indices.iter().zip(weights) {
            if index < 1 { return Err(Error::IndexOutOfBounds { index, len: self.len() }); }
            if weight != 0.0 && !valid_weight(weight) { return Err(Error::InvalidWeight { weight }); }
            target_len = target_len.max(index);
        }
        if target_len > self.len() { self.try_resize(target_len)?; }
        for (&index, &weight) in indices.iter().zip(weights) {
            self.arena.clear_weight(index);
            if weight != 0.0 { self.arena.insert_weight(index, weight); }
        }
        Ok(())
    }

    /// Sets `weights[i]` at `indices[i]` for all `i`, growing the length if
    /// needed. Panics where [`Self::try_insert_many`] errors.
    #[inline] pub fn insert_many(&mut self, indices: &[usize], weights: &[f64]) {
        if let Err(e) = self.try_insert_many(indices, weights) { panic!("{e}"); }
    }

    /// Draws an index with probability proportional to its weight, or returns
    /// [`None`] when all weights are zero. Consumes a few 64-bit words of `rng`.
    #[inline] pub fn try_sample<R: RngCore + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        self.arena.try_sample(rng)
    }

    /// Draws an index with probability proportional to its weight. Panics when
    /// all weights are zero.
    ///
    /// # Example
    ///
    /// ```
    /// use rand::SeedableRng;
    ///
    /// let mut s = dds::Sampler::new(9);
    /// s.set(9, 0.125);
    /// let mut rng = rand_pcg::Pcg64Mcg::seed_from_u64(5);
    /// assert_eq!(s.sample(&mut rng), 9);
    /// ```
    #[inline] pub fn sample<R: RngCore + ?Sized>(&self, rng: &mut R) -> usize {
        self.try_sample(rng).expect("cannot sample: all weights are zero")
    }

    /// Returns an iterator over the `(index, weight)` pairs with nonzero
    /// weight, in index order.
    ///
    /// # Example
    ///
    /// ```
    /// let mut s = dds::Sampler::new(5);
    /// s.set(4, 0.5);
    /// s.set(2, 3.0);
    /// assert_eq!(s.iter().collect::<Vec<_>>(), [(2, 3.0), (4, 0.5)]);
    /// ```
    #[inline] pub fn iter(&self) -> Weights<'_> {
        Weights { arena: &self.arena, index: 1, remaining: self.active_len() }
    }

    /// Returns the exact sum of all weights, accurately rounded to a `f64`.
    #[inline] pub fn total_weight(&self) -> f64 {
        FSum::with_all(self.iter().map(|(_, weight)| weight)).value()
    }

    /// Recomputes all internal bookkeeping from first principles and panics on
    /// the first inconsistency. Intended for tests and debugging.
    #[inline] pub fn verify(&self) { self.arena.verify() }
}

impl<P: ResizePolicy> Clone for Sampler<P> {
    #[inline] fn clone(&self) -> Self { Self { arena: self.arena.clone(), policy: PhantomData } }
}

impl<P: ResizePolicy> fmt::Debug for Sampler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sampler{{len: {}, nonzero: {}, total weight: {}}}",
            self.len(), self.active_len(), self.total_weight())
    }
}

impl<P: ResizePolicy> GetSize for Sampler<P> {
    fn size_bytes_dyn(&self) -> usize { self.arena.words.size_bytes_dyn() }
    const USES_DYN_MEM: bool = true;
}

/// Iterator over the `(index, weight)` pairs with nonzero weight, in index
/// order. Returned by [`Sampler::iter`].
pub struct Weights<'a> {
    arena: &'a Arena,
    index: usize,
    remaining: usize
}

impl Iterator for Weights<'_> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            let index = self.index;
            self.index += 1;
            if self.arena.edit_pos(index) != 0 {
                self.remaining -= 1;
                return Some((index, self.arena.weight(index)));
            }
        }
        None
    }

    #[inline] fn size_hint(&self) -> (usize, Option<usize>) { (self.remaining, Some(self.remaining)) }
}

impl ExactSizeIterator for Weights<'_> {}
impl FusedIterator for Weights<'_> {}
