//! Global offset resolution and the final scatter.
//!
//! Groups write into one shared output concurrently. Every valid key has a distinct offset,
//! so writes never overlap and need no synchronisation; sinks only have to tolerate disjoint
//! concurrent writes.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::classify::Bin;
use crate::histogram::GroupHistogram;

/// Offset of a lane that must not be written
pub const NO_OFFSET: usize = usize::MAX;

/// Destination of scattered elements
pub trait ScatterSink<T>: Sync {
    /// Number of addressable slots
    fn capacity(&self) -> usize;

    /// Store `value` at `offset`.
    ///
    /// # Safety
    /// No other write to the same offset may happen concurrently.
    unsafe fn write(&self, offset: usize, value: T);
}

/// Mutable slice shared by all groups of a dispatch
pub struct ScatterSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// Safety: writes go through `ScatterSink::write`, whose callers guarantee disjoint offsets
unsafe impl<T: Send> Send for ScatterSlice<'_, T> {}
unsafe impl<T: Send> Sync for ScatterSlice<'_, T> {}

impl<'a, T> ScatterSlice<'a, T> {
    /// Borrow `slice` for the duration of a dispatch
    pub fn new(slice: &'a mut [T]) -> Self {
        Self {
            ptr     : slice.as_mut_ptr(),
            len     : slice.len(),
            _marker : PhantomData,
        }
    }
}

impl<T: Copy + Send> ScatterSink<T> for ScatterSlice<'_, T> {
    #[inline(always)]
    fn capacity(&self) -> usize {
        self.len
    }

    #[inline(always)]
    unsafe fn write(&self, offset: usize, value: T) {
        assert!(offset < self.len, "scatter offset {} out of bounds ({})", offset, self.len);
        self.ptr.add(offset).write(value);
    }
}

impl ScatterSink<u32> for [AtomicU32] {
    #[inline(always)]
    fn capacity(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    unsafe fn write(&self, offset: usize, value: u32) {
        self[offset].store(value, Ordering::Relaxed);
    }
}

/// Sink for keys-only passes' values
#[derive(Debug, Default, Copy, Clone)]
pub struct Discard;

impl<T> ScatterSink<T> for Discard {
    #[inline(always)]
    fn capacity(&self) -> usize {
        usize::MAX
    }

    #[inline(always)]
    unsafe fn write(&self, _offset: usize, _value: T) {}
}

/// Combines local positions with the group's bin carry.
///
/// Holds the running carry of the tile (BinCarry plus totals of earlier cycles) and, for the
/// current cycle, that carry biased by the cycle's lower-bin prefix, so that a key at
/// position `p` of the bin-ordered cycle lands at `biased[bin] + p`.
#[derive(Debug, Clone)]
pub struct OffsetResolver {
    running: Vec<usize>,
    biased: Vec<usize>,
}

impl OffsetResolver {
    /// Resolver starting from a BinCarry snapshot
    pub fn new(carry: &[usize]) -> Self {
        Self {
            running : carry.to_vec(),
            biased  : carry.to_vec(),
        }
    }

    /// Bias the running carry by the lower-bin prefix of the cycle just ranked.
    /// Intermediate values may wrap; resolved offsets never do.
    pub fn bias<H: GroupHistogram>(&mut self, hist: &H) {
        for (b, (biased, running)) in self.biased.iter_mut().zip(self.running.iter()).enumerate() {
            *biased = running.wrapping_sub(hist.bin_offset(b as Bin));
        }
    }

    /// Output offset of the key of `bin` at bin-ordered position `position` of the cycle
    #[inline(always)]
    pub fn resolve(&self, bin: Bin, position: usize) -> usize {
        self.biased[bin as usize].wrapping_add(position)
    }

    /// Move the running carry past the cycle's keys
    pub fn advance<H: GroupHistogram>(&mut self, hist: &H) {
        for (b, running) in self.running.iter_mut().enumerate() {
            *running += hist.bin_total(b as Bin);
        }
    }
}

/// Write every source element that has an offset. `read(i)` yields source element `i`.
pub fn scatter<T, S, F>(sink: &S, offsets: &[usize], read: F)
where
    S: ScatterSink<T> + ?Sized,
    F: Fn(usize) -> T,
{
    for (src, &offset) in offsets.iter().enumerate() {
        if offset == NO_OFFSET {
            continue;
        }
        // Safety: offsets of one dispatch are pairwise distinct
        unsafe { sink.write(offset, read(src)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TileConfig;
    use crate::histogram::NaiveHistogram;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_scatter_slice() {
        let mut out = vec![0u32; 4];
        {
            let sink = ScatterSlice::new(&mut out);
            assert_eq!(sink.capacity(), 4);
            scatter(&sink, &[2, NO_OFFSET, 0, 3], |i| (i as u32 + 1) * 10);
        }
        assert_eq!(out, vec![30, 0, 10, 40]);
    }

    #[test]
    fn test_atomic_sink() {
        let out: Vec<AtomicU32> = (0..3).map(|_| AtomicU32::new(0)).collect();
        scatter(out.as_slice(), &[1, 2, 0], |i| i as u32 + 7);
        let got: Vec<u32> = out.iter().map(|a| a.load(Ordering::Relaxed)).collect();
        assert_eq!(got, vec![9, 7, 8]);
    }

    #[test]
    fn test_resolver() {
        let config = TileConfig::default().with_geometry(6, 1, 1).with_workers(1, 1).with_bins(4);
        let mut h = NaiveHistogram::new(&config);
        h.reset();
        h.accumulate(0, &[3, 1, 3, 2, 1, 1]);
        h.scan();

        // a lone group: carry = lower-bin totals
        let mut resolver = OffsetResolver::new(&[0, 0, 3, 4]);
        resolver.bias(&h);
        // bin 1 occupies cycle positions 0..3, bin 2 position 3, bin 3 positions 4..6
        assert_eq!(resolver.resolve(1, 2), 2);
        assert_eq!(resolver.resolve(2, 3), 3);
        assert_eq!(resolver.resolve(3, 5), 5);

        // a zero carry on bin 2 makes its bias wrap, the resolved offset does not
        let mut shifted = OffsetResolver::new(&[100, 100, 0, 200]);
        shifted.bias(&h);
        assert_eq!(shifted.resolve(2, 3), 0);
        assert_eq!(shifted.resolve(1, 0), 100);

        resolver.advance(&h);
        resolver.bias(&h);
        assert_eq!(resolver.resolve(1, 0), 3);
    }
}
