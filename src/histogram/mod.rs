//! Group histograms: per-worker counting plus the cooperative scan that turns counts into
//! per-key local ranks.
//!
//! Both backends publish one counter set per (load, worker) entry, rake and scan them the same
//! way, and answer the same extraction queries, so the tile pass is written once against
//! [`GroupHistogram`].
pub mod naive;
pub mod packed;

pub use naive::NaiveHistogram;
pub use packed::{PackedCounters, PackedHistogram};

use crate::classify::Bin;
use crate::config::TileConfig;

/// Counting and ranking contract shared by the histogram backends.
///
/// Per cycle: every entry is [`accumulate`](GroupHistogram::accumulate)d exactly once, then
/// [`scan`](GroupHistogram::scan) runs, then ranks and totals may be queried.
pub trait GroupHistogram: Send {
    /// Storage shaped for `config`
    fn new(config: &TileConfig) -> Self
    where
        Self: Sized;

    /// Forget the previous cycle
    fn reset(&mut self);

    /// Count one worker's load; `entry = load * workers + worker`, `bins` one per lane.
    fn accumulate(&mut self, entry: usize, bins: &[Bin]);

    /// Raking reduction followed by the subgroup scan
    fn scan(&mut self);

    /// Cycle-local rank of the key in `lane` of `entry`: keys of lower bins in the cycle plus
    /// earlier keys of the same bin. The lane's bin is recovered from what was accumulated;
    /// `None` for invalid lanes.
    fn rank(&self, entry: usize, lane: usize) -> Option<usize>;

    /// Keys of `bin` in the cycle
    fn bin_total(&self, bin: Bin) -> usize;

    /// Keys of all bins below `bin` in the cycle
    fn bin_offset(&self, bin: Bin) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::INVALID_BIN;
    use crate::config::HistogramBackend;

    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Straightforward ranks of one cycle laid out entry-major
    fn reference_ranks(bins: &[Bin], bin_count: usize) -> Vec<usize> {
        let mut totals = vec![0usize; bin_count];
        for &b in bins.iter().filter(|b| **b != INVALID_BIN) {
            totals[b as usize] += 1;
        }
        let mut offsets = vec![0usize; bin_count];
        for b in 1..bin_count {
            offsets[b] = offsets[b - 1] + totals[b - 1];
        }
        bins.iter()
            .map(|&b| {
                if b == INVALID_BIN {
                    usize::MAX
                } else {
                    let r = offsets[b as usize];
                    offsets[b as usize] += 1;
                    r
                }
            })
            .collect()
    }

    fn ranks_with<H: GroupHistogram>(config: &TileConfig, bins: &[Bin]) -> (Vec<usize>, Vec<usize>) {
        let lanes = config.vector_lanes;
        let mut hist = H::new(config);
        hist.reset();
        for entry in 0..config.raking_entries() {
            hist.accumulate(entry, &bins[entry * lanes..(entry + 1) * lanes]);
        }
        hist.scan();
        let ranks = bins.iter()
            .enumerate()
            .map(|(i, _)| hist.rank(i / lanes, i % lanes).unwrap_or(usize::MAX))
            .collect();
        let totals = (0..config.bin_count as Bin).map(|b| hist.bin_total(b)).collect();
        (ranks, totals)
    }

    #[test]
    fn test_backends_agree_with_reference() {
        let mut rng = StdRng::seed_from_u64(7);
        let shapes = [(4, 2, 8, 4), (15, 1, 16, 1), (1, 1, 1, 1), (8, 3, 10, 6), (3, 4, 32, 32)];
        for &(lanes, loads, workers, raking) in shapes.iter() {
            for bins_n in [1usize, 2, 5, 16] {
                let config = TileConfig::default()
                    .with_geometry(lanes, loads, 1)
                    .with_workers(workers, 32)
                    .with_raking_workers(raking)
                    .with_bins(bins_n);
                let n = config.cycle_elements();
                let valid = rng.gen_range(0..=n);
                let bins: Vec<Bin> = (0..n)
                    .map(|i| if i < valid { rng.gen_range(0..bins_n as Bin) } else { INVALID_BIN })
                    .collect();
                let expected = reference_ranks(&bins, bins_n);

                let packed_config = config.clone().with_backend(HistogramBackend::Packed);
                assert_eq!(packed_config.validate(), Ok(()));
                let (packed, packed_totals) = ranks_with::<PackedHistogram>(&packed_config, &bins);
                let (naive, naive_totals) = ranks_with::<NaiveHistogram>(&config, &bins);
                assert_eq!(packed, expected);
                assert_eq!(naive, expected);
                assert_eq!(packed_totals, naive_totals);
                assert_eq!(packed_totals.iter().sum::<usize>(), valid);
            }
        }
    }
}
