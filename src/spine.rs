//! Work distribution, upsweep and spine.
//!
//! The input is cut into tiles and the tiles into contiguous runs, one run per group. Before
//! any group scatters, every group counts its run (upsweep) and the per-group counts are
//! scanned bin-major into each group's BinCarry (spine): the offset of a group's first key of
//! bin `b` is the number of keys of lower bins overall plus the keys of bin `b` in earlier
//! groups.

use std::ops::Range;

use rayon::prelude::*;

use crate::classify::{DigitClassifier, INVALID_BIN};
use crate::error::PartitionError;

/// Assignment of tiles to groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDistribution {
    elements: usize,
    tile_elements: usize,
    tiles: usize,
    groups: usize,
    base: usize,
    extra: usize,
}

impl WorkDistribution {
    /// Split `elements` into tiles of `tile_elements` and spread them over at most `groups`
    /// groups. Every group gets at least one tile, unless there is no tile at all.
    pub fn new(elements: usize, tile_elements: usize, groups: usize) -> Self {
        let tile_elements = tile_elements.max(1);
        let tiles  = (elements + tile_elements - 1) / tile_elements;
        let groups = groups.max(1).min(tiles.max(1));
        Self {
            elements,
            tile_elements,
            tiles,
            groups,
            base  : tiles / groups,
            extra : tiles % groups,
        }
    }

    /// Number of groups actually used
    #[inline(always)]
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Total number of tiles
    #[inline(always)]
    pub fn tiles(&self) -> usize {
        self.tiles
    }

    /// Elements per full tile
    #[inline(always)]
    pub fn tile_elements(&self) -> usize {
        self.tile_elements
    }

    /// Number of tiles of group `g`
    #[inline(always)]
    pub fn group_tiles(&self, g: usize) -> usize {
        self.base + (g < self.extra) as usize
    }

    /// Range of tiles of group `g`
    pub fn tile_range(&self, g: usize) -> Range<usize> {
        let start = g * self.base + g.min(self.extra);
        start..start + self.group_tiles(g)
    }

    /// Range of elements of group `g`. Only the very last range can end in a partial tile.
    pub fn group_range(&self, g: usize) -> Range<usize> {
        let tiles = self.tile_range(g);
        (tiles.start * self.tile_elements).min(self.elements)..(tiles.end * self.tile_elements).min(self.elements)
    }
}

/// Per-group per-bin counts of every group's run of keys. Keys classified invalid are not
/// counted.
///
/// Fails if the classifier returns any other bin outside `[0, bins)`.
pub fn upsweep<K, C>(keys: &[K], dist: &WorkDistribution, classifier: &C, bins: usize) -> Result<Vec<Vec<usize>>, PartitionError>
where
    K: Sync,
    C: DigitClassifier<K>,
{
    (0..dist.groups())
        .into_par_iter()
        .map(|g| {
            let mut hist = vec![0usize; bins];
            for key in &keys[dist.group_range(g)] {
                let bin = classifier.classify(key);
                if bin == INVALID_BIN {
                    continue;
                }
                let bin = bin as usize;
                match hist.get_mut(bin) {
                    Some(count) => *count += 1,
                    None => return Err(PartitionError::PassFailed(format!("classifier returned bin {} of {}", bin, bins))),
                }
            }
            Ok(hist)
        })
        .collect()
}

/// BinCarry of every group, plus the global per-bin totals and exclusive offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spine {
    /// One BinCarry per group
    pub carries: Vec<Vec<usize>>,
    /// Keys per bin over all groups
    pub totals: Vec<usize>,
    /// Start of each bin in the output
    pub offsets: Vec<usize>,
}

/// Bin-major exclusive scan of the per-group histograms
pub fn spine(histograms: &[Vec<usize>], bins: usize) -> Spine {
    let mut carries = vec![vec![0usize; bins]; histograms.len()];
    let mut totals  = vec![0usize; bins];
    let mut offsets = vec![0usize; bins];

    let mut running = 0;
    for b in 0..bins {
        offsets[b] = running;
        for (carry, hist) in carries.iter_mut().zip(histograms.iter()) {
            carry[b] = running;
            running += hist[b];
        }
        totals[b] = running - offsets[b];
    }

    Spine {
        carries,
        totals,
        offsets,
    }
}

/// BinCarry of group `group` alone, computed from every group's histogram
pub fn group_carry(histograms: &[Vec<usize>], group: usize, bins: usize) -> Vec<usize> {
    let mut carry   = vec![0usize; bins];
    let mut running = 0;
    for (b, slot) in carry.iter_mut().enumerate() {
        let earlier: usize = histograms[..group].iter().map(|h| h[b]).sum();
        let all: usize     = histograms.iter().map(|h| h[b]).sum();
        *slot    = running + earlier;
        running += all;
    }
    carry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Modulo;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_distribution() {
        let d = WorkDistribution::new(10, 3, 2);
        assert_eq!(d.tiles(), 4);
        assert_eq!(d.groups(), 2);
        assert_eq!(d.group_range(0), 0..6);
        assert_eq!(d.group_range(1), 6..10);

        let uneven = WorkDistribution::new(10, 2, 3);
        assert_eq!(uneven.tile_range(0), 0..2);
        assert_eq!(uneven.tile_range(1), 2..4);
        assert_eq!(uneven.tile_range(2), 4..5);
        assert_eq!(uneven.group_range(2), 8..10);

        let few = WorkDistribution::new(5, 8, 16);
        assert_eq!(few.groups(), 1);
        assert_eq!(few.group_range(0), 0..5);

        let empty = WorkDistribution::new(0, 8, 4);
        assert_eq!(empty.tiles(), 0);
        assert_eq!(empty.groups(), 1);
        assert_eq!(empty.group_range(0), 0..0);
    }

    #[test]
    fn test_upsweep_and_spine() {
        let keys = [3u32, 1, 3, 2, 1, 1];
        let d = WorkDistribution::new(keys.len(), 3, 2);
        let hists = upsweep(&keys, &d, &Modulo::new(4), 4).unwrap();
        assert_eq!(hists, vec![vec![0, 1, 0, 2], vec![0, 2, 1, 0]]);

        let s = spine(&hists, 4);
        assert_eq!(s.totals, vec![0, 3, 1, 2]);
        assert_eq!(s.offsets, vec![0, 0, 3, 4]);
        assert_eq!(s.carries, vec![vec![0, 0, 3, 4], vec![0, 1, 3, 6]]);
        for g in 0..2 {
            assert_eq!(group_carry(&hists, g, 4), s.carries[g]);
        }
    }

    #[test]
    fn test_upsweep_rejects_out_of_range_bins() {
        let keys = [7u32];
        let d = WorkDistribution::new(1, 4, 1);
        let err = upsweep(&keys, &d, &Modulo::new(8), 4).unwrap_err();
        assert_eq!(err, PartitionError::PassFailed("classifier returned bin 7 of 4".to_string()));
    }
}
