//! Serial reference implementations used to check the engine.
//!
//! The reference partition is a stable counting sort on the digit: count, exclusive scan,
//! then place every key at its bin's cursor in input order.

use crate::classify::{DigitClassifier, INVALID_BIN};

/// Per-bin key counts
pub fn reference_histogram<K, C: DigitClassifier<K>>(keys: &[K], classifier: &C) -> Vec<usize> {
    let mut histogram = vec![0usize; classifier.bin_count()];
    for key in keys {
        let bin = classifier.classify(key);
        if bin != INVALID_BIN {
            histogram[bin as usize] += 1;
        }
    }
    histogram
}

/// Stable partition of `keys` (and `values`) by bin. Keys classified invalid are left out.
pub fn reference_partition<K, V, C>(keys: &[K], values: Option<&[V]>, classifier: &C) -> (Vec<K>, Vec<V>)
where
    K: Copy + Default,
    V: Copy + Default,
    C: DigitClassifier<K>,
{
    let mut cursor = reference_histogram(keys, classifier);
    let mut sum = 0usize;
    for count in cursor.iter_mut() {
        let c = *count;
        *count = sum;
        sum += c;
    }

    let mut out_keys   = vec![K::default(); sum];
    let mut out_values = vec![V::default(); if values.is_some() { sum } else { 0 }];
    for (i, key) in keys.iter().enumerate() {
        let bin = classifier.classify(key);
        if bin == INVALID_BIN {
            continue;
        }
        let bin = bin as usize;
        let pos = cursor[bin];
        out_keys[pos] = *key;
        if let Some(vals) = values {
            out_values[pos] = vals[i];
        }
        cursor[bin] += 1;
    }
    (out_keys, out_values)
}

/// Whether `keys` are grouped by non-decreasing bin
#[inline]
pub fn is_partitioned<K, C: DigitClassifier<K>>(keys: &[K], classifier: &C) -> bool {
    keys.windows(2).all(|w| classifier.classify(&w[0]) <= classifier.classify(&w[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Modulo;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_reference_partition() {
        let m = Modulo::new(4);
        let keys = [3u32, 1, 3, 2, 1, 1];
        assert_eq!(reference_histogram(&keys, &m), vec![0, 3, 1, 2]);

        let vals = ['a', 'b', 'c', 'd', 'e', 'f'];
        let (k, v) = reference_partition(&keys, Some(&vals[..]), &m);
        assert_eq!(k, vec![1, 1, 1, 2, 3, 3]);
        assert_eq!(v.iter().collect::<String>(), "befdac");
        assert!(is_partitioned(&k, &m));
        assert!(!is_partitioned(&keys, &m));
    }
}
