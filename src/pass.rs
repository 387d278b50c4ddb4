//! One group's tile pass.
//!
//! A pass walks a fixed sequence of stages for every cycle of a tile:
//!
//! ```none
//! Loaded -> HistogramBuilt -> LocallyRanked -> [Reordered] -> GloballyOffset -> Scattered
//!              ^                                                                  |
//!              +--------------------------- next cycle ---------------------------+
//! ```
//!
//! Workers of the group are simulated in lock-step: each stage loops over every worker before
//! returning, so the end of a stage is the group-wide barrier the next stage relies on. No
//! stage can return early for a subset of workers.

use crate::classify::{Bin, DigitClassifier, INVALID_BIN};
use crate::config::{PayloadKind, ScatterKind, TileConfig};
use crate::error::PartitionError;
use crate::exchange::ExchangeBuffer;
use crate::histogram::GroupHistogram;
use crate::scatter::{scatter, OffsetResolver, ScatterSink, NO_OFFSET};
use crate::tile::Tile;

/// Stage a tile pass has completed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PassState {
    /// Nothing loaded yet
    Idle,
    /// Keys (and values) are in the tile
    Loaded,
    /// Every worker has published its packed counters for the cycle
    HistogramBuilt,
    /// Every valid key of the cycle has its local rank
    LocallyRanked,
    /// Keys sit in rank order in the exchange buffer
    Reordered,
    /// Every valid key has its output offset
    GloballyOffset,
    /// The cycle has been written out
    Scattered,
}

impl PassState {
    /// Stage that must follow `self`
    pub fn next(self, scatter: ScatterKind) -> PassState {
        match (self, scatter) {
            (Self::Idle, _)                                => Self::Loaded,
            (Self::Loaded, _) | (Self::Scattered, _)       => Self::HistogramBuilt,
            (Self::HistogramBuilt, _)                      => Self::LocallyRanked,
            (Self::LocallyRanked, ScatterKind::TwoPhase)   => Self::Reordered,
            (Self::LocallyRanked, ScatterKind::Direct)     => Self::GloballyOffset,
            (Self::Reordered, _)                           => Self::GloballyOffset,
            (Self::GloballyOffset, _)                      => Self::Scattered,
        }
    }
}

/// Classify one cycle and let every worker count its loads. Nothing is counted if the
/// classifier returns a bin out of range.
fn count_cycle<K, V, C, H>(config: &TileConfig, tile: &mut Tile<K, V>, hist: &mut H, classifier: &C, cycle: usize) -> Result<(), PartitionError>
where
    K: Copy + Default,
    V: Copy + Default,
    C: DigitClassifier<K>,
    H: GroupHistogram,
{
    tile.decode_bins(cycle, classifier)?;
    hist.reset();
    for load in 0..config.loads_per_cycle {
        for worker in 0..config.workers_per_group {
            hist.accumulate(load * config.workers_per_group + worker, tile.load_bins(cycle, load, worker));
        }
    }
    Ok(())
}

/// Run the scan network and extract the cycle-local rank of every lane. Invalid lanes get
/// the cycle capacity.
fn rank_cycle<H: GroupHistogram>(config: &TileConfig, hist: &mut H, ranks: &mut [usize]) {
    hist.scan();
    let lanes    = config.vector_lanes;
    let capacity = config.cycle_elements();
    for (j, rank) in ranks.iter_mut().enumerate() {
        *rank = hist.rank(j / lanes, j % lanes).unwrap_or(capacity);
    }
}

/// A group's reusable state for partitioning tiles
pub struct TilePass<'c, K, V, C, H> {
    config: &'c TileConfig,
    classifier: &'c C,
    tile: Tile<K, V>,
    histogram: H,
    exchange: Option<ExchangeBuffer<K, V>>,
    resolver: OffsetResolver,
    ranks: Vec<usize>,
    offsets: Vec<usize>,
    tile_totals: Vec<usize>,
    cycle: usize,
    state: PassState,
    with_values: bool,
}

impl<'c, K, V, C, H> TilePass<'c, K, V, C, H>
where
    K: Copy + Default,
    V: Copy + Default,
    C: DigitClassifier<K>,
    H: GroupHistogram,
{
    /// Group-local storage for `config`, which must already be validated
    pub fn new(config: &'c TileConfig, classifier: &'c C) -> Self {
        let cycle_elements = config.cycle_elements();
        let with_values    = config.payload == PayloadKind::KeysAndValues;
        let exchange = match config.scatter {
            ScatterKind::TwoPhase => Some(ExchangeBuffer::new(cycle_elements, config.workers_per_group, with_values)),
            ScatterKind::Direct   => None,
        };
        Self {
            config,
            classifier,
            tile        : Tile::new(config),
            histogram   : H::new(config),
            exchange,
            resolver    : OffsetResolver::new(&vec![0; config.bin_count]),
            ranks       : vec![0; cycle_elements],
            offsets     : vec![NO_OFFSET; cycle_elements],
            tile_totals : vec![0; config.bin_count],
            cycle       : 0,
            state       : PassState::Idle,
            with_values,
        }
    }

    /// Last completed stage
    pub fn state(&self) -> PassState {
        self.state
    }

    /// Cycle currently being processed
    pub fn cycle(&self) -> usize {
        self.cycle
    }

    /// Cycle-local ranks of the current cycle, valid from `LocallyRanked` on
    pub fn cycle_ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Resolved offsets of the current cycle, valid from `GloballyOffset` on. Indexed by
    /// element (direct) or by exchange slot (two-phase); [`NO_OFFSET`] marks unused entries.
    pub fn cycle_offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Per-bin counts of the cycles scattered so far
    pub fn tile_totals(&self) -> &[usize] {
        &self.tile_totals
    }

    #[inline]
    fn enter(&mut self, next: PassState) {
        debug_assert_eq!(self.state.next(self.config.scatter), next, "tile pass out of order");
        self.state = next;
    }

    /// Load a tile and snapshot its BinCarry. Starts a new invocation from any state.
    ///
    /// Values must be given exactly when the configuration moves them, covering every guarded
    /// key.
    pub fn load(&mut self, keys: &[K], values: Option<&[V]>, guarded: usize, carry: &[usize]) -> Result<(), PartitionError> {
        let n = guarded.min(keys.len()).min(self.tile.capacity());
        match (self.with_values, values) {
            (true, None) => {
                return Err(PartitionError::Payload("configuration moves values but none were given".to_string()));
            },
            (false, Some(_)) => {
                return Err(PartitionError::Payload("configuration is keys-only but values were given".to_string()));
            },
            (true, Some(vals)) if vals.len() < n => {
                return Err(PartitionError::Payload(format!("{} values for {} keys", vals.len(), n)));
            },
            _ => {},
        }
        if carry.len() != self.config.bin_count {
            return Err(PartitionError::CarryLength { expected: self.config.bin_count, found: carry.len() });
        }
        self.tile.load(keys, values, guarded);
        self.resolver = OffsetResolver::new(carry);
        self.tile_totals.fill(0);
        self.cycle = 0;
        self.state = PassState::Loaded;
        log::trace!("tile loaded: {} of {} elements valid", self.tile.valid_elements(), self.tile.capacity());
        Ok(())
    }

    /// Every worker classifies and counts its loads of the current cycle
    pub fn build_histogram(&mut self) -> Result<(), PartitionError> {
        self.enter(PassState::HistogramBuilt);
        count_cycle(self.config, &mut self.tile, &mut self.histogram, self.classifier, self.cycle)
    }

    /// Scan network and per-key extraction
    pub fn rank(&mut self) {
        self.enter(PassState::LocallyRanked);
        rank_cycle(self.config, &mut self.histogram, &mut self.ranks);
    }

    /// Two-phase only: move keys (and values) into rank order in the exchange buffer
    pub fn reorder(&mut self) {
        self.enter(PassState::Reordered);
        let start = self.cycle * self.config.cycle_elements();
        let valid = self.tile.valid_in_cycle(self.cycle);
        if let Some(exchange) = self.exchange.as_mut() {
            exchange.stage_keys(&self.tile.keys[start..], &self.ranks, valid);
            if self.with_values {
                exchange.stage_values(&self.tile.values[start..], &self.ranks, valid);
            }
        }
    }

    /// Turn local positions into output offsets with the biased carry
    pub fn resolve_offsets(&mut self) {
        self.enter(PassState::GloballyOffset);
        self.resolver.bias(&self.histogram);
        self.offsets.fill(NO_OFFSET);

        match (self.config.scatter, self.exchange.as_ref()) {
            (ScatterKind::TwoPhase, Some(exchange)) => {
                // bins are re-derived from the reordered keys
                for (_worker, slot) in exchange.linear_slots() {
                    let bin = self.classifier.classify(&exchange.key(slot));
                    self.offsets[slot] = self.resolver.resolve(bin, slot);
                }
            },
            _ => {
                let start = self.cycle * self.config.cycle_elements();
                let valid = self.tile.valid_in_cycle(self.cycle);
                for j in 0..valid {
                    let bin: Bin = self.tile.bins[start + j];
                    if bin != INVALID_BIN {
                        self.offsets[j] = self.resolver.resolve(bin, self.ranks[j]);
                    }
                }
            },
        }
    }

    /// Write the cycle out and move on to the next one
    pub fn scatter<SK, SV>(&mut self, key_sink: &SK, value_sink: &SV)
    where
        SK: ScatterSink<K> + ?Sized,
        SV: ScatterSink<V> + ?Sized,
    {
        self.enter(PassState::Scattered);
        match self.exchange.as_ref() {
            Some(exchange) => {
                scatter(key_sink, &self.offsets, |slot| exchange.key(slot));
                if self.with_values {
                    scatter(value_sink, &self.offsets, |slot| exchange.value(slot));
                }
            },
            None => {
                let start  = self.cycle * self.config.cycle_elements();
                let tile   = &self.tile;
                scatter(key_sink, &self.offsets, |j| tile.keys[start + j]);
                if self.with_values {
                    scatter(value_sink, &self.offsets, |j| tile.values[start + j]);
                }
            },
        }

        self.resolver.advance(&self.histogram);
        for (b, total) in self.tile_totals.iter_mut().enumerate() {
            *total += self.histogram.bin_total(b as Bin);
        }
        self.cycle += 1;
    }

    /// Partition one tile: the first `guarded` elements of `keys` (and `values`) are written
    /// to `key_sink` (and `value_sink`) at `carry[bin] + bin rank`. Returns the tile's per-bin
    /// counts.
    ///
    /// A bin out of range stops the pass at the cycle it occurs in; earlier cycles have
    /// already been written.
    pub fn run<SK, SV>(
        &mut self,
        keys: &[K],
        values: Option<&[V]>,
        guarded: usize,
        carry: &[usize],
        key_sink: &SK,
        value_sink: &SV,
    ) -> Result<&[usize], PartitionError>
    where
        SK: ScatterSink<K> + ?Sized,
        SV: ScatterSink<V> + ?Sized,
    {
        self.load(keys, values, guarded, carry)?;
        for _ in 0..self.config.cycles_per_tile {
            self.build_histogram()?;
            self.rank();
            if self.config.scatter == ScatterKind::TwoPhase {
                self.reorder();
            }
            self.resolve_offsets();
            self.scatter(key_sink, value_sink);
        }
        Ok(&self.tile_totals)
    }
}

/// Per-key ranking of one tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRanks {
    /// Bin of each valid key
    pub bins: Vec<Bin>,
    /// Earlier keys of the same bin in the tile, [`NO_OFFSET`] for keys classified invalid
    pub bin_ranks: Vec<usize>,
    /// Keys of lower bins in the tile plus the bin rank
    pub local_ranks: Vec<usize>,
    /// Per-bin counts of the tile
    pub histogram: Vec<usize>,
}

/// Load, count and rank one tile without scattering it. Fails if the classifier returns a
/// bin out of range.
pub fn rank_tile<K, C, H>(config: &TileConfig, classifier: &C, keys: &[K], guarded: usize) -> Result<TileRanks, PartitionError>
where
    K: Copy + Default,
    C: DigitClassifier<K>,
    H: GroupHistogram,
{
    let mut tile: Tile<K, ()> = Tile::new(config);
    tile.load(keys, None, guarded);
    let mut hist  = H::new(config);
    let mut ranks = vec![0usize; config.cycle_elements()];
    let n = tile.valid_elements();

    let mut bins      = vec![INVALID_BIN; n];
    let mut bin_ranks = vec![NO_OFFSET; n];
    let mut seen      = vec![0usize; config.bin_count];

    for cycle in 0..config.cycles_per_tile {
        count_cycle(config, &mut tile, &mut hist, classifier, cycle)?;
        rank_cycle(config, &mut hist, &mut ranks);
        let start = cycle * config.cycle_elements();
        for j in 0..tile.valid_in_cycle(cycle) {
            let bin = tile.bins[start + j];
            bins[start + j] = bin;
            if bin != INVALID_BIN {
                bin_ranks[start + j] = seen[bin as usize] + ranks[j] - hist.bin_offset(bin);
            }
        }
        for (b, s) in seen.iter_mut().enumerate() {
            *s += hist.bin_total(b as Bin);
        }
    }

    let mut offsets = vec![0usize; config.bin_count];
    for b in 1..config.bin_count {
        offsets[b] = offsets[b - 1] + seen[b - 1];
    }
    let local_ranks = bins.iter()
        .zip(bin_ranks.iter())
        .map(|(&bin, &r)| if bin == INVALID_BIN { NO_OFFSET } else { offsets[bin as usize] + r })
        .collect();

    Ok(TileRanks {
        bins,
        bin_ranks,
        local_ranks,
        histogram: seen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Modulo;
    use crate::config::HistogramBackend;
    use crate::histogram::{NaiveHistogram, PackedHistogram};
    use crate::scatter::{Discard, ScatterSlice};

    use pretty_assertions::assert_eq;

    fn tiny(scatter: ScatterKind, payload: PayloadKind) -> TileConfig {
        TileConfig::default()
            .with_geometry(2, 1, 2)
            .with_workers(2, 2)
            .with_bins(4)
            .with_scatter(scatter)
            .with_payload(payload)
            .with_backend(HistogramBackend::Packed)
    }

    #[test]
    fn test_concrete_ranks() {
        let config = tiny(ScatterKind::Direct, PayloadKind::KeysOnly);
        let keys = [3u32, 1, 3, 2, 1, 1];
        let r = rank_tile::<u32, _, PackedHistogram>(&config, &Modulo::new(4), &keys, keys.len()).unwrap();
        assert_eq!(r.bins, vec![3, 1, 3, 2, 1, 1]);
        assert_eq!(r.bin_ranks, vec![0, 0, 1, 0, 1, 2]);
        assert_eq!(r.local_ranks, vec![4, 0, 5, 3, 1, 2]);
        assert_eq!(r.histogram, vec![0, 3, 1, 2]);

        let n = rank_tile::<u32, _, NaiveHistogram>(&config, &Modulo::new(4), &keys, keys.len()).unwrap();
        assert_eq!(n, r);
    }

    #[test]
    fn test_rank_tile_rejects_out_of_range_bins() {
        let config = tiny(ScatterKind::Direct, PayloadKind::KeysOnly);
        let keys = [1u32, 17, 2];
        for err in [
            rank_tile::<u32, _, PackedHistogram>(&config, &Modulo::new(32), &keys, 3).unwrap_err(),
            rank_tile::<u32, _, NaiveHistogram>(&config, &Modulo::new(32), &keys, 3).unwrap_err(),
        ] {
            assert_eq!(err, PartitionError::PassFailed("classifier returned bin 17 of 4".to_string()));
        }
    }

    #[test]
    fn test_state_sequence() {
        for scatter_kind in [ScatterKind::TwoPhase, ScatterKind::Direct] {
            let config = tiny(scatter_kind, PayloadKind::KeysOnly);
            let classifier = Modulo::new(4);
            let mut pass: TilePass<u32, (), _, PackedHistogram> = TilePass::new(&config, &classifier);
            assert_eq!(pass.state(), PassState::Idle);

            let keys = [3u32, 1, 3, 2, 1, 1];
            let mut out = vec![0u32; 6];
            let sink = ScatterSlice::new(&mut out);
            pass.load(&keys, None, keys.len(), &[0, 0, 3, 4]).unwrap();
            let mut seen = vec![pass.state()];
            for _ in 0..config.cycles_per_tile {
                pass.build_histogram().unwrap();
                seen.push(pass.state());
                pass.rank();
                seen.push(pass.state());
                if scatter_kind == ScatterKind::TwoPhase {
                    pass.reorder();
                    seen.push(pass.state());
                }
                pass.resolve_offsets();
                seen.push(pass.state());
                pass.scatter(&sink, &Discard);
                seen.push(pass.state());
            }
            drop(sink);

            let mut expected = vec![PassState::Loaded];
            for _ in 0..2 {
                expected.push(PassState::HistogramBuilt);
                expected.push(PassState::LocallyRanked);
                if scatter_kind == ScatterKind::TwoPhase {
                    expected.push(PassState::Reordered);
                }
                expected.push(PassState::GloballyOffset);
                expected.push(PassState::Scattered);
            }
            assert_eq!(seen, expected);
            assert_eq!(pass.tile_totals(), &[0, 3, 1, 2]);
            assert_eq!(out, vec![1, 1, 1, 2, 3, 3]);
        }
    }

    #[test]
    fn test_invalid_lanes_rank_past_capacity() {
        let config = tiny(ScatterKind::Direct, PayloadKind::KeysOnly);
        let classifier = Modulo::new(4);
        let mut pass: TilePass<u32, (), _, NaiveHistogram> = TilePass::new(&config, &classifier);
        pass.load(&[2, 0, 1], None, 3, &[0, 1, 2, 3]).unwrap();
        pass.build_histogram().unwrap();
        pass.rank();
        assert_eq!(pass.cycle_ranks(), &[2, 0, 1, 4]);
        pass.resolve_offsets();
        assert_eq!(pass.cycle_offsets(), &[2, 0, 1, NO_OFFSET]);
    }

    #[test]
    fn test_pairs_follow_keys() {
        for scatter_kind in [ScatterKind::TwoPhase, ScatterKind::Direct] {
            let config = tiny(scatter_kind, PayloadKind::KeysAndValues);
            let classifier = Modulo::new(4);
            let mut pass: TilePass<u32, char, _, PackedHistogram> = TilePass::new(&config, &classifier);
            let keys = [3u32, 1, 3, 2, 1, 1, 0];
            let vals = ['a', 'b', 'c', 'd', 'e', 'f', 'g'];
            let mut out_k = vec![0u32; 7];
            let mut out_v = vec!['-'; 7];
            {
                let ks = ScatterSlice::new(&mut out_k);
                let vs = ScatterSlice::new(&mut out_v);
                let totals = pass.run(&keys, Some(&vals[..]), keys.len(), &[0, 1, 4, 5], &ks, &vs).unwrap();
                assert_eq!(totals, &[1, 3, 1, 2]);
            }
            assert_eq!(out_k, vec![0, 1, 1, 1, 2, 3, 3]);
            assert_eq!(out_v.iter().collect::<String>(), "gbefdac");
        }
    }

    #[test]
    fn test_load_checks_payload() {
        let classifier = Modulo::new(4);
        let keys = [3u32, 1, 2];
        let vals = ['a', 'b'];

        let pairs = tiny(ScatterKind::TwoPhase, PayloadKind::KeysAndValues);
        let mut pass: TilePass<u32, char, _, NaiveHistogram> = TilePass::new(&pairs, &classifier);
        let mut out = vec![0u32; 3];
        let ks = ScatterSlice::new(&mut out);
        let err = pass.run(&keys, None, 3, &[0, 0, 1, 2], &ks, &Discard).unwrap_err();
        assert_eq!(err, PartitionError::Payload("configuration moves values but none were given".to_string()));
        let err = pass.load(&keys, Some(&vals[..]), 3, &[0, 0, 1, 2]).unwrap_err();
        assert_eq!(err, PartitionError::Payload("2 values for 3 keys".to_string()));
        assert_eq!(pass.state(), PassState::Idle);
        // a short value slice is fine when the guard stops before it ends
        pass.load(&keys, Some(&vals[..]), 2, &[0, 0, 1, 2]).unwrap();
        assert_eq!(pass.state(), PassState::Loaded);

        let keys_only = tiny(ScatterKind::Direct, PayloadKind::KeysOnly);
        let mut pass: TilePass<u32, char, _, PackedHistogram> = TilePass::new(&keys_only, &classifier);
        let err = pass.load(&keys, Some(&vals[..]), 2, &[0, 0, 1, 2]).unwrap_err();
        assert_eq!(err, PartitionError::Payload("configuration is keys-only but values were given".to_string()));
        let err = pass.load(&keys, None, 3, &[0, 0]).unwrap_err();
        assert_eq!(err, PartitionError::CarryLength { expected: 4, found: 2 });
    }
}
