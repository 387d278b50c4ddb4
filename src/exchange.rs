//! Local exchange buffer for the two-phase scatter.
//!
//! Keys are first written into group-local scratch at their cycle-local rank, which leaves the
//! scratch bin-ordered. After the barrier, slot `i` is read back by worker `i % workers` on
//! pass `i / workers`, so consecutive workers touch consecutive slots and, since a bin's keys
//! are contiguous, mostly consecutive output addresses.

/// Group-local scratch for one cycle
#[derive(Debug, Clone)]
pub struct ExchangeBuffer<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    workers: usize,
    staged: usize,
}

impl<K: Copy + Default, V: Copy + Default> ExchangeBuffer<K, V> {
    /// Scratch for `capacity` elements read back by `workers` workers
    pub fn new(capacity: usize, workers: usize, with_values: bool) -> Self {
        Self {
            keys    : vec![K::default(); capacity],
            values  : if with_values { vec![V::default(); capacity] } else { Vec::new() },
            workers,
            staged  : 0,
        }
    }

    /// Write the first `valid` keys at their ranks. Keys ranked at or past the capacity were
    /// classified invalid and are dropped; the remaining ranks must be a permutation of
    /// `0..staged`.
    pub fn stage_keys(&mut self, keys: &[K], ranks: &[usize], valid: usize) {
        let mut staged = 0;
        for (key, &rank) in keys[..valid].iter().zip(ranks[..valid].iter()) {
            if let Some(slot) = self.keys.get_mut(rank) {
                *slot = *key;
                staged += 1;
            }
        }
        self.staged = staged;
    }

    /// Write values at the same ranks as their keys
    pub fn stage_values(&mut self, values: &[V], ranks: &[usize], valid: usize) {
        for (value, &rank) in values[..valid].iter().zip(ranks[..valid].iter()) {
            if let Some(slot) = self.values.get_mut(rank) {
                *slot = *value;
            }
        }
    }

    /// Number of keys staged in the current cycle
    #[inline(always)]
    pub fn staged(&self) -> usize {
        self.staged
    }

    /// Scratch slots in worker read-back order: `(worker, slot)` pairs, pass by pass.
    pub fn linear_slots(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let workers = self.workers;
        let passes  = (self.staged + workers - 1) / workers;
        (0..passes).flat_map(move |pass| {
            (0..workers)
                .map(move |worker| (worker, pass * workers + worker))
                .filter(move |(_, slot)| *slot < self.staged)
        })
    }

    /// Key in scratch slot `slot`
    #[inline(always)]
    pub fn key(&self, slot: usize) -> K {
        self.keys[slot]
    }

    /// Value in scratch slot `slot`
    #[inline(always)]
    pub fn value(&self, slot: usize) -> V {
        self.values[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_stage_and_read_back() {
        let mut ex: ExchangeBuffer<u32, char> = ExchangeBuffer::new(8, 2, true);
        let keys  = [3u32, 1, 9, 3, 2, 1, 1, 0];
        let vals  = ['a', 'b', 'x', 'c', 'd', 'e', 'f', 'x'];
        // the third key was classified invalid
        let ranks = [4usize, 0, 8, 5, 3, 1, 2, 8];
        ex.stage_keys(&keys, &ranks, 7);
        ex.stage_values(&vals, &ranks, 7);
        assert_eq!(ex.staged(), 6);

        let slots: Vec<(usize, usize)> = ex.linear_slots().collect();
        assert_eq!(slots, vec![(0, 0), (1, 1), (0, 2), (1, 3), (0, 4), (1, 5)]);
        let read: Vec<u32> = slots.iter().map(|(_, s)| ex.key(*s)).collect();
        assert_eq!(read, vec![1, 1, 1, 2, 3, 3]);
        let vread: String = slots.iter().map(|(_, s)| ex.value(*s)).collect();
        assert_eq!(vread, "befdac");
    }

    #[test]
    fn test_partial_last_pass() {
        let mut ex: ExchangeBuffer<u8, ()> = ExchangeBuffer::new(8, 4, false);
        ex.stage_keys(&[9, 8, 7, 6, 5], &[0, 1, 2, 3, 4], 5);
        let slots: Vec<usize> = ex.linear_slots().map(|(_, s)| s).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4]);
    }
}
