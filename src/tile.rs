//! Tile storage and the tile loader.
//!
//! Elements live in flat per-tile arrays indexed by
//! `((cycle * loads + load) * workers + worker) * lanes + lane`, which is also input order.
//! A worker's vector of lanes for one load is contiguous, so one load is one slice.

use crate::classify::{Bin, DigitClassifier, INVALID_BIN};
use crate::config::TileConfig;
use crate::error::PartitionError;

/// Keys, optional values and per-key bins of the tile a group is working on
#[derive(Debug, Clone)]
pub struct Tile<K, V> {
    /// Keys; lanes past `guarded` are don't-care
    pub keys: Vec<K>,
    /// Values, empty for keys-only passes
    pub values: Vec<V>,
    /// Bin of each key, [`INVALID_BIN`] past `guarded`
    pub bins: Vec<Bin>,
    lanes: usize,
    loads: usize,
    workers: usize,
    cycle_elements: usize,
    bin_count: usize,
    guarded: usize,
}

impl<K: Copy + Default, V: Copy + Default> Tile<K, V> {
    /// Empty tile shaped by `config`
    pub fn new(config: &TileConfig) -> Self {
        let n = config.tile_elements();
        Self {
            keys           : vec![K::default(); n],
            values         : Vec::new(),
            bins           : vec![INVALID_BIN; n],
            lanes          : config.vector_lanes,
            loads          : config.loads_per_cycle,
            workers        : config.workers_per_group,
            cycle_elements : config.cycle_elements(),
            bin_count      : config.bin_count,
            guarded        : 0,
        }
    }

    /// Tile capacity
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Load up to `guarded` keys (and values) from the start of the given slices.
    ///
    /// The slices may be longer than the tile; only the first `min(guarded, capacity)`
    /// elements are read. Lanes beyond that keep whatever they held.
    pub fn load(&mut self, keys: &[K], values: Option<&[V]>, guarded: usize) {
        let n = guarded.min(self.capacity()).min(keys.len());
        self.guarded = n;
        self.keys[..n].copy_from_slice(&keys[..n]);
        if let Some(vals) = values {
            if self.values.len() != self.capacity() {
                self.values = vec![V::default(); self.capacity()];
            }
            self.values[..n].copy_from_slice(&vals[..n]);
        }
    }

    /// Classify every valid key of one cycle; invalid lanes get [`INVALID_BIN`].
    ///
    /// Fails on the first bin outside `[0, bin_count)` other than [`INVALID_BIN`].
    pub fn decode_bins<C: DigitClassifier<K>>(&mut self, cycle: usize, classifier: &C) -> Result<(), PartitionError> {
        let start = cycle * self.cycle_elements;
        for idx in start..start + self.cycle_elements {
            let bin = if idx < self.guarded {
                classifier.classify(&self.keys[idx])
            } else {
                INVALID_BIN
            };
            if bin != INVALID_BIN && bin as usize >= self.bin_count {
                return Err(PartitionError::PassFailed(format!("classifier returned bin {} of {}", bin, self.bin_count)));
            }
            self.bins[idx] = bin;
        }
        Ok(())
    }

    /// Number of valid elements in the whole tile
    #[inline(always)]
    pub fn valid_elements(&self) -> usize {
        self.guarded
    }

    /// Number of valid elements in one cycle; always a prefix of the cycle
    #[inline(always)]
    pub fn valid_in_cycle(&self, cycle: usize) -> usize {
        self.guarded.saturating_sub(cycle * self.cycle_elements).min(self.cycle_elements)
    }

    /// Tile index of (cycle, load, worker, lane)
    #[inline(always)]
    pub fn index(&self, cycle: usize, load: usize, worker: usize, lane: usize) -> usize {
        ((cycle * self.loads + load) * self.workers + worker) * self.lanes + lane
    }

    /// Whether the element at (cycle, load, worker, lane) is inside the guarded range
    #[inline(always)]
    pub fn is_valid(&self, cycle: usize, load: usize, worker: usize, lane: usize) -> bool {
        self.index(cycle, load, worker, lane) < self.guarded
    }

    /// Bins of one worker's vector for one load
    #[inline(always)]
    pub fn load_bins(&self, cycle: usize, load: usize, worker: usize) -> &[Bin] {
        let start = self.index(cycle, load, worker, 0);
        &self.bins[start..start + self.lanes]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Modulo;

    use pretty_assertions::assert_eq;

    fn small_config() -> TileConfig {
        TileConfig::default().with_geometry(2, 2, 2).with_workers(2, 4).with_bins(4)
    }

    #[test]
    fn test_layout_and_guard() {
        let config = small_config();
        let mut tile: Tile<u32, u32> = Tile::new(&config);
        assert_eq!(tile.capacity(), 16);

        let keys: Vec<u32> = (0..16).collect();
        tile.load(&keys, None, 11);
        assert_eq!(tile.valid_elements(), 11);
        assert_eq!(tile.valid_in_cycle(0), 8);
        assert_eq!(tile.valid_in_cycle(1), 3);
        assert_eq!(tile.index(1, 0, 1, 1), 11);
        assert!(tile.is_valid(1, 0, 1, 0));
        assert!(!tile.is_valid(1, 0, 1, 1));
        assert!(tile.values.is_empty());

        tile.decode_bins(1, &Modulo::new(4)).unwrap();
        assert_eq!(tile.load_bins(1, 0, 0), &[0, 1]);
        assert_eq!(tile.load_bins(1, 0, 1), &[2, INVALID_BIN]);
        assert_eq!(tile.load_bins(1, 1, 0), &[INVALID_BIN, INVALID_BIN]);
    }

    #[test]
    fn test_load_values() {
        let config = small_config();
        let mut tile: Tile<u32, u64> = Tile::new(&config);
        let keys = [5u32, 6, 7];
        let vals = [50u64, 60, 70];
        tile.load(&keys, Some(&vals[..]), 100);
        assert_eq!(tile.valid_elements(), 3);
        assert_eq!(&tile.values[..3], &[50, 60, 70]);
        assert_eq!(tile.values.len(), 16);
    }

    #[test]
    fn test_decode_rejects_out_of_range_bins() {
        let config = small_config();
        let mut tile: Tile<u32, ()> = Tile::new(&config);
        tile.load(&[1, 6, 2], None, 3);
        let err = tile.decode_bins(0, &Modulo::new(8)).unwrap_err();
        assert_eq!(err, PartitionError::PassFailed("classifier returned bin 6 of 4".to_string()));

        // lanes past the guard are never classified
        tile.load(&[1, 2, 3], None, 2);
        tile.decode_bins(0, &Modulo::new(8)).unwrap();
        assert_eq!(tile.load_bins(0, 0, 0), &[1, 2]);
    }
}
