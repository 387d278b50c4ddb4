//! One counter per bin. Used when there are too few bins for packing to pay off, or too many
//! for a nibble word.

use crate::classify::{Bin, INVALID_BIN};
use crate::config::TileConfig;
use crate::scan::{subgroup_exclusive_scan, Sum};

use super::GroupHistogram;

/// Group histogram with plain `u32` counters
#[derive(Debug, Clone)]
pub struct NaiveHistogram {
    bins: usize,
    lanes: usize,
    segment: usize,
    raking: usize,
    /// entries x bins; after raking, the exclusive prefix within the segment
    counts: Vec<u32>,
    /// entries x lanes
    lane_prefix: Vec<u32>,
    /// entries x lanes, [`INVALID_BIN`] for invalid lanes
    lane_bins: Vec<Bin>,
    /// raking workers x bins
    seg_base: Vec<u32>,
    totals: Vec<u32>,
    offsets: Vec<u32>,
    column: Vec<u32>,
}

impl GroupHistogram for NaiveHistogram {
    fn new(config: &TileConfig) -> Self {
        let bins    = config.bin_count;
        let entries = config.raking_entries();
        Self {
            bins,
            lanes       : config.vector_lanes,
            segment     : config.raking_segment(),
            raking      : config.raking_workers,
            counts      : vec![0; entries * bins],
            lane_prefix : vec![0; entries * config.vector_lanes],
            lane_bins   : vec![INVALID_BIN; entries * config.vector_lanes],
            seg_base    : vec![0; config.raking_workers * bins],
            totals      : vec![0; bins],
            offsets     : vec![0; bins],
            column      : Vec::with_capacity(config.raking_workers),
        }
    }

    fn reset(&mut self) {
        self.counts.fill(0);
        self.lane_prefix.fill(0);
        self.lane_bins.fill(INVALID_BIN);
    }

    fn accumulate(&mut self, entry: usize, bins: &[Bin]) {
        let row = &mut self.counts[entry * self.bins..(entry + 1) * self.bins];
        row.fill(0);
        let lane_bins = &mut self.lane_bins[entry * self.lanes..(entry + 1) * self.lanes];
        lane_bins.fill(INVALID_BIN);
        for (lane, &bin) in bins.iter().enumerate() {
            lane_bins[lane] = bin;
            if bin == INVALID_BIN {
                continue;
            }
            self.lane_prefix[entry * self.lanes + lane] = row[bin as usize];
            row[bin as usize] += 1;
        }
    }

    fn scan(&mut self) {
        let bins = self.bins;

        // raking: serial exclusive prefix over each segment
        for r in 0..self.raking {
            let base = &mut self.seg_base[r * bins..(r + 1) * bins];
            base.fill(0);
            for entry in r * self.segment..(r + 1) * self.segment {
                let row = &mut self.counts[entry * bins..(entry + 1) * bins];
                for (running, slot) in base.iter_mut().zip(row.iter_mut()) {
                    let mine = *slot;
                    *slot = *running;
                    *running += mine;
                }
            }
        }

        // subgroup scan, one bin at a time
        for b in 0..bins {
            self.column.clear();
            self.column.extend((0..self.raking).map(|r| self.seg_base[r * bins + b]));
            self.totals[b] = subgroup_exclusive_scan::<u32, Sum>(&mut self.column);
            for (r, excl) in self.column.iter().enumerate() {
                self.seg_base[r * bins + b] = *excl;
            }
        }

        let mut running = 0;
        for b in 0..bins {
            self.offsets[b] = running;
            running += self.totals[b];
        }
        for r in 0..self.raking {
            for b in 0..bins {
                self.seg_base[r * bins + b] += self.offsets[b];
            }
        }
    }

    #[inline]
    fn rank(&self, entry: usize, lane: usize) -> Option<usize> {
        let bin = self.lane_bins[entry * self.lanes + lane];
        if bin == INVALID_BIN {
            return None;
        }
        let b   = bin as usize;
        let seg = entry / self.segment;
        Some((self.seg_base[seg * self.bins + b]
            + self.counts[entry * self.bins + b]
            + self.lane_prefix[entry * self.lanes + lane]) as usize)
    }

    #[inline]
    fn bin_total(&self, bin: Bin) -> usize {
        self.totals[bin as usize] as usize
    }

    #[inline]
    fn bin_offset(&self, bin: Bin) -> usize {
        self.offsets[bin as usize] as usize
    }
}
