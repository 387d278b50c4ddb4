//! Dispatch of a partition over many concurrent groups.
//!
//! A dispatch runs in three steps: the upsweep counts every group's run of keys, the spine
//! turns the counts into one BinCarry per group, and the downsweep runs every group's tiles
//! concurrently, each group scattering into the shared output at disjoint offsets. Every
//! precondition is checked before the downsweep starts, so a failed dispatch leaves the
//! output untouched.

use std::marker::PhantomData;
use std::time::Instant;

use rayon::prelude::*;

use crate::classify::DigitClassifier;
use crate::config::{HistogramBackend, PayloadKind, TileConfig};
use crate::error::{ConfigError, PartitionError};
use crate::histogram::{GroupHistogram, NaiveHistogram, PackedHistogram};
use crate::pass::{rank_tile, TilePass, TileRanks};
use crate::scatter::{Discard, ScatterSink, ScatterSlice};
use crate::spine::{spine, upsweep, WorkDistribution};

/// Outcome of a full dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    /// Keys per bin
    pub bin_totals: Vec<usize>,
    /// Start of each bin in the output
    pub bin_offsets: Vec<usize>,
    /// Groups that ran
    pub groups: usize,
    /// Tiles processed
    pub tiles: usize,
}

/// Stable partitioner of keys (and values) by digit
pub struct Partitioner<K, C> {
    config: TileConfig,
    classifier: C,
    groups: usize,
    _key: PhantomData<fn(&K)>,
}

impl<K, C> Partitioner<K, C>
where
    K: Copy + Default + Send + Sync,
    C: DigitClassifier<K>,
{
    /// Validate `config` against its own packing limits and against `classifier`
    pub fn new(config: TileConfig, classifier: C) -> Result<Self, ConfigError> {
        config.validate()?;
        if classifier.bin_count() != config.bin_count {
            return Err(ConfigError::ClassifierMismatch { expected: config.bin_count, found: classifier.bin_count() });
        }
        Ok(Self {
            config,
            classifier,
            groups : rayon::current_num_threads(),
            _key   : PhantomData,
        })
    }

    /// Number of concurrent groups to split a dispatch over
    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups.max(1);
        self
    }

    /// Validated configuration
    pub fn config(&self) -> &TileConfig {
        &self.config
    }

    /// Classifier
    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Stable keys-only partition of `keys` into `out`
    pub fn partition_keys(&self, keys: &[K], out: &mut [K]) -> Result<PartitionSummary, PartitionError> {
        if self.config.payload != PayloadKind::KeysOnly {
            return Err(PartitionError::Payload("configuration moves values but none were given".to_string()));
        }
        check_capacity(keys.len(), out.len())?;
        let key_sink = ScatterSlice::new(out);
        self.dispatch::<(), _, _>(keys, None, &key_sink, &Discard)
    }

    /// Stable partition of `keys` into `out_keys`, moving `values` along into `out_values`
    pub fn partition_pairs<V>(
        &self,
        keys: &[K],
        values: &[V],
        out_keys: &mut [K],
        out_values: &mut [V],
    ) -> Result<PartitionSummary, PartitionError>
    where
        V: Copy + Default + Send + Sync,
    {
        if self.config.payload != PayloadKind::KeysAndValues {
            return Err(PartitionError::Payload("configuration is keys-only but values were given".to_string()));
        }
        if values.len() != keys.len() {
            return Err(PartitionError::Payload(format!("{} values for {} keys", values.len(), keys.len())));
        }
        check_capacity(keys.len(), out_keys.len())?;
        check_capacity(keys.len(), out_values.len())?;
        let key_sink   = ScatterSlice::new(out_keys);
        let value_sink = ScatterSlice::new(out_values);
        self.dispatch(keys, Some(values), &key_sink, &value_sink)
    }

    /// Downsweep of a single group with a caller-supplied BinCarry. Keys of bin `b` land at
    /// `carry[b]`, `carry[b] + 1`, ... in input order. Returns the group's per-bin counts.
    ///
    /// The output ranges the carry gives the group's non-empty bins must not overlap, so a
    /// carry of lower-bin totals is required whenever more than one bin is populated.
    pub fn partition_group<V, SK, SV>(
        &self,
        keys: &[K],
        values: Option<&[V]>,
        carry: &[usize],
        key_sink: &SK,
        value_sink: &SV,
    ) -> Result<Vec<usize>, PartitionError>
    where
        V: Copy + Default + Send + Sync,
        SK: ScatterSink<K> + ?Sized,
        SV: ScatterSink<V> + ?Sized,
    {
        let bins = self.config.bin_count;
        if carry.len() != bins {
            return Err(PartitionError::CarryLength { expected: bins, found: carry.len() });
        }
        self.check_payload(keys.len(), values)?;

        let dist = WorkDistribution::new(keys.len(), self.config.tile_elements(), 1);
        let histogram = upsweep(keys, &dist, &self.classifier, bins)?.remove(0);
        check_carry(carry, &histogram)?;
        let needed = carry.iter()
            .zip(histogram.iter())
            .filter(|(_, count)| **count > 0)
            .map(|(&start, &count)| start + count)
            .max()
            .unwrap_or(0);
        check_capacity(needed, key_sink.capacity())?;
        if values.is_some() {
            check_capacity(needed, value_sink.capacity())?;
        }

        let totals = match self.config.resolved_backend() {
            HistogramBackend::Packed => self.run_group::<V, PackedHistogram, SK, SV>(keys, values, carry, key_sink, value_sink)?,
            _                        => self.run_group::<V, NaiveHistogram, SK, SV>(keys, values, carry, key_sink, value_sink)?,
        };
        check_counts(0, &histogram, &totals)?;
        Ok(totals)
    }

    /// Rank one tile without scattering it: the first `guarded` keys are classified, counted
    /// and ranked.
    pub fn rank_tile(&self, keys: &[K], guarded: usize) -> Result<TileRanks, PartitionError> {
        match self.config.resolved_backend() {
            HistogramBackend::Packed => rank_tile::<K, C, PackedHistogram>(&self.config, &self.classifier, keys, guarded),
            _                        => rank_tile::<K, C, NaiveHistogram>(&self.config, &self.classifier, keys, guarded),
        }
    }

    fn check_payload<V>(&self, n: usize, values: Option<&[V]>) -> Result<(), PartitionError> {
        match (self.config.payload, values) {
            (PayloadKind::KeysOnly, Some(_)) => {
                Err(PartitionError::Payload("configuration is keys-only but values were given".to_string()))
            },
            (PayloadKind::KeysAndValues, None) => {
                Err(PartitionError::Payload("configuration moves values but none were given".to_string()))
            },
            (_, Some(vals)) if vals.len() != n => {
                Err(PartitionError::Payload(format!("{} values for {} keys", vals.len(), n)))
            },
            _ => Ok(()),
        }
    }

    fn dispatch<V, SK, SV>(&self, keys: &[K], values: Option<&[V]>, key_sink: &SK, value_sink: &SV) -> Result<PartitionSummary, PartitionError>
    where
        V: Copy + Default + Send + Sync,
        SK: ScatterSink<K> + ?Sized,
        SV: ScatterSink<V> + ?Sized,
    {
        let start = Instant::now();
        let bins  = self.config.bin_count;
        let dist  = WorkDistribution::new(keys.len(), self.config.tile_elements(), self.groups);
        log::info!("Partitioning {} keys over {} groups ({} tiles)", keys.len(), dist.groups(), dist.tiles());
        log::debug!("Tile configuration: {}", self.config);

        let histograms = upsweep(keys, &dist, &self.classifier, bins)?;
        let sp = spine(&histograms, bins);

        match self.config.resolved_backend() {
            HistogramBackend::Packed => self.downsweep::<V, PackedHistogram, SK, SV>(keys, values, &dist, &histograms, &sp.carries, key_sink, value_sink)?,
            _                        => self.downsweep::<V, NaiveHistogram, SK, SV>(keys, values, &dist, &histograms, &sp.carries, key_sink, value_sink)?,
        }

        log::info!("Partition done in {:.3} s", start.elapsed().as_secs_f64());
        Ok(PartitionSummary {
            bin_totals  : sp.totals,
            bin_offsets : sp.offsets,
            groups      : dist.groups(),
            tiles       : dist.tiles(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn downsweep<V, H, SK, SV>(
        &self,
        keys: &[K],
        values: Option<&[V]>,
        dist: &WorkDistribution,
        histograms: &[Vec<usize>],
        carries: &[Vec<usize>],
        key_sink: &SK,
        value_sink: &SV,
    ) -> Result<(), PartitionError>
    where
        V: Copy + Default + Send + Sync,
        H: GroupHistogram,
        SK: ScatterSink<K> + ?Sized,
        SV: ScatterSink<V> + ?Sized,
    {
        (0..dist.groups()).into_par_iter().try_for_each(|g| {
            let range  = dist.group_range(g);
            let vals   = values.map(|v| &v[range.clone()]);
            let totals = self.run_group::<V, H, SK, SV>(&keys[range], vals, &carries[g], key_sink, value_sink)?;
            log::debug!("Group {} done: {} tiles", g, dist.group_tiles(g));
            check_counts(g, &histograms[g], &totals)
        })
    }

    /// Run a group's tiles in order, each starting from the carry advanced past the earlier
    /// tiles of the group.
    fn run_group<V, H, SK, SV>(&self, keys: &[K], values: Option<&[V]>, carry: &[usize], key_sink: &SK, value_sink: &SV) -> Result<Vec<usize>, PartitionError>
    where
        V: Copy + Default + Send + Sync,
        H: GroupHistogram,
        SK: ScatterSink<K> + ?Sized,
        SV: ScatterSink<V> + ?Sized,
    {
        let tile_elements = self.config.tile_elements();
        let mut pass: TilePass<K, V, C, H> = TilePass::new(&self.config, &self.classifier);
        let mut snapshot = carry.to_vec();
        let mut totals   = vec![0usize; self.config.bin_count];

        for (t, tile_keys) in keys.chunks(tile_elements).enumerate() {
            let tile_values = values.map(|v| &v[t * tile_elements..t * tile_elements + tile_keys.len()]);
            let tile_totals = pass.run(tile_keys, tile_values, tile_keys.len(), &snapshot, key_sink, value_sink)?;
            for ((s, total), count) in snapshot.iter_mut().zip(totals.iter_mut()).zip(tile_totals.iter()) {
                *s     += count;
                *total += count;
            }
        }
        Ok(totals)
    }
}

fn check_capacity(needed: usize, available: usize) -> Result<(), PartitionError> {
    if available < needed {
        Err(PartitionError::Capacity { needed, available })
    } else {
        Ok(())
    }
}

/// Output ranges `[carry[b], carry[b] + counts[b])` of the non-empty bins must be disjoint
fn check_carry(carry: &[usize], counts: &[usize]) -> Result<(), PartitionError> {
    let mut ranges: Vec<(usize, usize, usize)> = carry.iter()
        .zip(counts.iter())
        .enumerate()
        .filter(|(_, (_, count))| **count > 0)
        .map(|(b, (&start, &count))| (start, start + count, b))
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        let (_, end, first) = pair[0];
        let (start, _, second) = pair[1];
        if start < end {
            return Err(PartitionError::CarryOverlap { first: first.min(second), second: first.max(second) });
        }
    }
    Ok(())
}

/// A group's downsweep must see the same keys per bin as the upsweep did
fn check_counts(group: usize, expected: &[usize], found: &[usize]) -> Result<(), PartitionError> {
    if expected != found {
        return Err(PartitionError::PassFailed(format!(
            "group {} counted {:?} in the downsweep but {:?} in the upsweep; is the classifier deterministic?",
            group, found, expected
        )));
    }
    Ok(())
}
