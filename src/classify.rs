//! Digit classifiers: pure functions from a key to its bin.

use num_traits::{PrimInt, Unsigned};

/// Bin index produced by a classifier
pub type Bin = u32;

/// Marks lanes past the guarded element count. Never counted, never scattered.
pub const INVALID_BIN: Bin = Bin::MAX;

/// Maps a key to a bin in `[0, bin_count)`.
///
/// Implementations must be pure and deterministic: the engine classifies a key more than
/// once per pass (upsweep, histogram, and again when re-deriving bins after the exchange).
pub trait DigitClassifier<K>: Sync {
    /// Number of bins this classifier can produce
    fn bin_count(&self) -> usize;
    /// Bin of `key`
    fn classify(&self, key: &K) -> Bin;
}

/// Radix digit: `bits` bits of the key starting at bit `shift`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RadixDigit {
    shift: u32,
    bits: u32,
}

impl RadixDigit {
    /// Digit of `bits` bits (at most 12) starting at `shift`
    pub fn new(shift: u32, bits: u32) -> Self {
        assert!(bits <= 12, "radix digits wider than 12 bits are not supported");
        Self { shift, bits }
    }
}

impl<K> DigitClassifier<K> for RadixDigit
where
    K: PrimInt + Unsigned + Sync,
{
    #[inline(always)]
    fn bin_count(&self) -> usize {
        1 << self.bits
    }

    #[inline(always)]
    fn classify(&self, key: &K) -> Bin {
        let digit = key.unsigned_shr(self.shift) & K::from((1u32 << self.bits) - 1).unwrap_or_else(K::max_value);
        digit.to_u32().unwrap_or(0)
    }
}

/// `key mod bins`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Modulo {
    bins: u32,
}

impl Modulo {
    /// Classifier into `bins` bins
    pub fn new(bins: u32) -> Self {
        assert!(bins > 0, "at least one bin is needed");
        Self { bins }
    }
}

impl<K> DigitClassifier<K> for Modulo
where
    K: PrimInt + Unsigned + Sync,
{
    #[inline(always)]
    fn bin_count(&self) -> usize {
        self.bins as usize
    }

    #[inline(always)]
    fn classify(&self, key: &K) -> Bin {
        match K::from(self.bins) {
            Some(m) => (*key % m).to_u32().unwrap_or(0),
            // modulus wider than the key type: every key is its own remainder
            None    => key.to_u32().unwrap_or(0),
        }
    }
}

/// Classifier backed by a closure
pub struct ClassifyFn<F> {
    bins: usize,
    f: F,
}

impl<F> ClassifyFn<F> {
    /// Wrap `f`, which must return values below `bins`
    pub fn new(bins: usize, f: F) -> Self {
        Self { bins, f }
    }
}

impl<K, F> DigitClassifier<K> for ClassifyFn<F>
where
    F: Fn(&K) -> Bin + Sync,
{
    #[inline(always)]
    fn bin_count(&self) -> usize {
        self.bins
    }

    #[inline(always)]
    fn classify(&self, key: &K) -> Bin {
        (self.f)(key)
    }
}

impl<K, C: DigitClassifier<K>> DigitClassifier<K> for &C {
    #[inline(always)]
    fn bin_count(&self) -> usize {
        (**self).bin_count()
    }

    #[inline(always)]
    fn classify(&self, key: &K) -> Bin {
        (**self).classify(key)
    }
}
