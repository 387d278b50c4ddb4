//! Cooperative scan network.
//!
//! Two levels, run once per cycle after all counters are published:
//!
//! 1. raking: each raking worker serially walks its contiguous segment of published counters,
//!    leaving an exclusive prefix in every slot and producing one segment total;
//! 2. subgroup scan: the raking workers, one lock-step subgroup, scan their totals with a
//!    Kogge-Stone network (log2(width) shuffle-up steps).
//!
//! The packed backend runs both levels on byte/16-bit packed words with [`Sum`], so one add
//! moves 4 or 8 bins at once.

use crate::bits::{lanes16_inclusive, lanes16_splat};

/// Associative binary operator with an identity, for scans
pub trait ScanOp<T> {
    /// Combine two partials
    fn op(a: T, b: T) -> T;
    /// Identity element
    fn identity() -> T;
}

/// Addition, identity 0. Wrapping, so it doubles as a lane-wise add on packed words.
pub struct Sum;

/// Maximum, identity 0
pub struct Max;

macro_rules! impl_scan_ops {
    ($($t:ty),*) => {
        $(
            impl ScanOp<$t> for Sum {
                #[inline(always)]
                fn op(a: $t, b: $t) -> $t {
                    a.wrapping_add(b)
                }
                #[inline(always)]
                fn identity() -> $t {
                    0
                }
            }

            impl ScanOp<$t> for Max {
                #[inline(always)]
                fn op(a: $t, b: $t) -> $t {
                    if a > b { a } else { b }
                }
                #[inline(always)]
                fn identity() -> $t {
                    0
                }
            }
        )*
    };
}

impl_scan_ops!(u32, u64, usize);

/// In-place inclusive scan of one value per subgroup lane.
///
/// Each step reads a snapshot of the previous step, like a shuffle-up across lock-step
/// lanes. Returns the subgroup total (identity when empty).
pub fn subgroup_inclusive_scan<T, Op>(lanes: &mut [T]) -> T
where
    T: Copy,
    Op: ScanOp<T>,
{
    let width = lanes.len();
    let mut snapshot = lanes.to_vec();
    let mut stride = 1;
    while stride < width {
        snapshot.copy_from_slice(lanes);
        for i in stride..width {
            lanes[i] = Op::op(snapshot[i - stride], snapshot[i]);
        }
        stride <<= 1;
    }
    lanes.last().copied().unwrap_or_else(Op::identity)
}

/// In-place exclusive scan: every lane receives the combination of the lanes before it.
/// Returns the subgroup total.
pub fn subgroup_exclusive_scan<T, Op>(lanes: &mut [T]) -> T
where
    T: Copy,
    Op: ScanOp<T>,
{
    let total = subgroup_inclusive_scan::<T, Op>(lanes);
    for i in (1..lanes.len()).rev() {
        lanes[i] = lanes[i - 1];
    }
    if let Some(first) = lanes.first_mut() {
        *first = Op::identity();
    }
    total
}

/// Serial raking of `grid` in segments of `segment` slots of `W` packed words each.
///
/// Every slot is replaced by the sum of the slots before it in its segment; the returned
/// vector holds one total per segment. Packed lanes must not overflow, which the
/// configuration guarantees for byte counters.
pub fn rake_segments<const W: usize>(grid: &mut [[u64; W]], segment: usize) -> Vec<[u64; W]> {
    grid.chunks_mut(segment)
        .map(|seg| {
            let mut running = [0u64; W];
            for slot in seg.iter_mut() {
                let mine = *slot;
                *slot = running;
                for w in 0..W {
                    running[w] = running[w].wrapping_add(mine[w]);
                }
            }
            running
        })
        .collect()
}

/// Word-wise subgroup scan over the raking totals.
///
/// `partials[r][w]` holds raking worker `r`'s contribution for word `w`. On return it holds
/// the exclusive prefix (inclusive minus own contribution); the group totals are returned.
pub fn scan_packed_partials<const W: usize>(partials: &mut [[u64; W]]) -> [u64; W] {
    let mut totals = [0u64; W];
    let mut column: Vec<u64> = Vec::with_capacity(partials.len());
    for w in 0..W {
        column.clear();
        column.extend(partials.iter().map(|p| p[w]));
        totals[w] = subgroup_inclusive_scan::<u64, Sum>(&mut column);
        for (p, inclusive) in partials.iter_mut().zip(column.iter()) {
            // packed lanes: inclusive >= own in every lane, no borrow
            p[w] = inclusive.wrapping_sub(p[w]);
        }
    }
    totals
}

/// Exclusive prefix over bins of the group totals, four bins per 16-bit-lane word.
///
/// Within a word the prefix is a multiply by [`crate::bits::LANES16_ONES`]; between words the
/// top lane of the running inclusive prefix is carried into every lane of the next word.
pub fn bin_exclusive_words<const W: usize>(totals: &[u64; W]) -> [u64; W] {
    let mut out = [0u64; W];
    let mut carry = 0u64;
    for w in 0..W {
        let inclusive = lanes16_inclusive(totals[w]);
        out[w] = inclusive.wrapping_sub(totals[w]).wrapping_add(lanes16_splat(carry));
        carry += inclusive >> 48;
    }
    out
}
