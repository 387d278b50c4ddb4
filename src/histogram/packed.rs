//! Bit-packed group histogram.
//!
//! Per worker and load, one pass over the vector lanes builds:
//!
//! ```none
//! nibbles      16 bins x 4 bits   count of each bin in this load
//! bin_ids      16 lanes x 4 bits  bin of each lane
//! lane_prefix  2 x (8 lanes x 8 bits)  earlier same-bin lanes in this load
//! ```
//!
//! Counting is a shift-add into the nibble of the lane's bin, so every lane costs the same no
//! matter which bin it hits. A nibble holds at most 15, and a load has at most 15 lanes. The
//! nibble word is then widened into two byte words (bins 0-7, 8-15) and published for raking,
//! which sums at most 255 per bin. Raking totals are unpacked again into 16-bit lanes, four
//! words of four bins, for the subgroup scan.

use crate::bits::{bfe, bfi, unpack_bytes, widen_nibbles};
use crate::classify::{Bin, INVALID_BIN};
use crate::config::TileConfig;
use crate::scan::{bin_exclusive_words, rake_segments, scan_packed_partials};

use super::GroupHistogram;

/// Packed counters of one worker's load
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PackedCounters {
    /// Per-bin counts, 4 bits each
    pub nibbles: u64,
    /// Per-lane bins, 4 bits each
    pub bin_ids: u64,
    /// Exclusive same-bin prefix of lanes 0-7 and 8-15, 8 bits each
    pub lane_prefix: [u64; 2],
    /// One bit per valid lane
    pub valid: u16,
}

impl PackedCounters {
    /// Count the bins of one load. Invalid lanes are masked out, not branched around.
    #[inline]
    pub fn build(bins: &[Bin]) -> Self {
        let mut c = Self::default();
        for (lane, &bin) in bins.iter().enumerate() {
            let valid = (bin != INVALID_BIN) as u64;
            let slot  = (bin as u64 & 0xF) & valid.wrapping_neg();
            let shift = 4 * slot as u32;

            let prefix = bfe(c.nibbles, shift, 4);
            c.lane_prefix[lane / 8] = bfi(c.lane_prefix[lane / 8], prefix, 8 * (lane % 8) as u32, 8);

            if lane == 0 {
                c.nibbles = valid << shift;
                c.bin_ids = slot;
            } else {
                c.nibbles += valid << shift;
                c.bin_ids = bfi(c.bin_ids, slot, 4 * lane as u32, 4);
            }
            c.valid |= (valid as u16) << lane;
        }
        c
    }

    /// Count of `bin` in this load
    #[inline(always)]
    pub fn count(&self, bin: Bin) -> u64 {
        bfe(self.nibbles, 4 * bin, 4)
    }

    /// Bin recorded for `lane`, if the lane was valid
    #[inline(always)]
    pub fn bin_of(&self, lane: usize) -> Option<Bin> {
        if self.valid >> lane & 1 == 1 {
            Some(bfe(self.bin_ids, 4 * lane as u32, 4) as Bin)
        } else {
            None
        }
    }

    /// Earlier lanes of this load that share `lane`'s bin
    #[inline(always)]
    pub fn lane_prefix(&self, lane: usize) -> u64 {
        bfe(self.lane_prefix[lane / 8], 8 * (lane % 8) as u32, 8)
    }

    /// Byte-wide counts: bins 0-7 and bins 8-15
    #[inline(always)]
    pub fn widen(&self) -> [u64; 2] {
        widen_nibbles(self.nibbles)
    }
}

/// Group histogram on packed counters
#[derive(Debug, Clone)]
pub struct PackedHistogram {
    segment: usize,
    counters: Vec<PackedCounters>,
    /// Byte counts per entry; after raking, the exclusive prefix within the segment
    grid: Vec<[u64; 2]>,
    /// Per raking worker, scan exclusive prefix plus lower-bin offsets, 16-bit lanes
    seg_base: Vec<[u64; 4]>,
    totals: [u64; 4],
    offsets: [u64; 4],
}

impl GroupHistogram for PackedHistogram {
    fn new(config: &TileConfig) -> Self {
        let entries = config.raking_entries();
        Self {
            segment  : config.raking_segment(),
            counters : vec![PackedCounters::default(); entries],
            grid     : vec![[0; 2]; entries],
            seg_base : vec![[0; 4]; config.raking_workers],
            totals   : [0; 4],
            offsets  : [0; 4],
        }
    }

    fn reset(&mut self) {
        self.counters.fill(PackedCounters::default());
        self.grid.fill([0; 2]);
        self.totals  = [0; 4];
        self.offsets = [0; 4];
    }

    #[inline]
    fn accumulate(&mut self, entry: usize, bins: &[Bin]) {
        let counters = PackedCounters::build(bins);
        self.grid[entry] = counters.widen();
        self.counters[entry] = counters;
    }

    fn scan(&mut self) {
        let seg_totals = rake_segments(&mut self.grid, self.segment);

        // word index = bin / 4: (quadrant 0, low half), (quadrant 0, high half), ...
        for (base, total) in self.seg_base.iter_mut().zip(seg_totals.iter()) {
            let lo = unpack_bytes(total[0]);
            let hi = unpack_bytes(total[1]);
            *base = [lo[0], lo[1], hi[0], hi[1]];
        }

        self.totals  = scan_packed_partials(&mut self.seg_base);
        self.offsets = bin_exclusive_words(&self.totals);
        for base in self.seg_base.iter_mut() {
            for w in 0..4 {
                base[w] = base[w].wrapping_add(self.offsets[w]);
            }
        }
    }

    #[inline]
    fn rank(&self, entry: usize, lane: usize) -> Option<usize> {
        let counters = &self.counters[entry];
        let b   = counters.bin_of(lane)? as usize;
        let seg = entry / self.segment;
        let scanned = bfe(self.seg_base[seg][b / 4], 16 * (b % 4) as u32, 16);
        let raked   = bfe(self.grid[entry][b / 8], 8 * (b % 8) as u32, 8);
        let local   = counters.lane_prefix(lane);
        Some((scanned + raked + local) as usize)
    }

    #[inline]
    fn bin_total(&self, bin: Bin) -> usize {
        bfe(self.totals[bin as usize / 4], 16 * (bin % 4), 16) as usize
    }

    #[inline]
    fn bin_offset(&self, bin: Bin) -> usize {
        bfe(self.offsets[bin as usize / 4], 16 * (bin % 4), 16) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_counters() {
        let c = PackedCounters::build(&[3, 1, 3, 2, INVALID_BIN, 1]);
        assert_eq!(c.count(1), 2);
        assert_eq!(c.count(2), 1);
        assert_eq!(c.count(3), 2);
        assert_eq!(c.count(0), 0);
        let prefixes: Vec<u64> = (0..6).filter(|l| *l != 4).map(|l| c.lane_prefix(l)).collect();
        assert_eq!(prefixes, vec![0, 0, 1, 0, 1]);
        assert_eq!(c.bin_of(2), Some(3));
        assert_eq!(c.bin_of(4), None);
        assert_eq!(c.valid, 0b101111);
        assert_eq!(c.widen(), [0x0000_0000_0201_0200, 0]);
    }

    #[test]
    fn test_fifteen_same_bin_lanes() {
        let bins = [9 as Bin; 15];
        let c = PackedCounters::build(&bins);
        assert_eq!(c.count(9), 15);
        assert_eq!(c.count(8), 0);
        assert_eq!(c.count(10), 0);
        assert_eq!(c.lane_prefix(14), 14);
        assert_eq!(c.lane_prefix(8), 8);
        assert_eq!(c.widen(), [0, 0x0000_0000_0000_0F00]);
    }

    #[test]
    fn test_high_bins_cross_words() {
        let config = TileConfig::default()
            .with_geometry(2, 1, 1)
            .with_workers(4, 4)
            .with_bins(16);
        let mut h = PackedHistogram::new(&config);
        h.reset();
        h.accumulate(0, &[15, 0]);
        h.accumulate(1, &[7, 8]);
        h.accumulate(2, &[15, 4]);
        h.accumulate(3, &[3, INVALID_BIN]);
        h.scan();
        // sorted: 0 | 3 | 4 | 7 | 8 | 15 15
        assert_eq!(h.rank(0, 1), Some(0));
        assert_eq!(h.rank(3, 0), Some(1));
        assert_eq!(h.rank(2, 1), Some(2));
        assert_eq!(h.rank(1, 0), Some(3));
        assert_eq!(h.rank(1, 1), Some(4));
        assert_eq!(h.rank(0, 0), Some(5));
        assert_eq!(h.rank(2, 0), Some(6));
        assert_eq!(h.rank(3, 1), None);
        assert_eq!(h.bin_total(15), 2);
        assert_eq!(h.bin_offset(15), 5);
        assert_eq!(h.bin_offset(8), 4);
    }
}
