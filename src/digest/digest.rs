// src/digest/digest.rs
use ordered_float::OrderedFloat;

use crate::digest::centroid::{is_sorted_by_mean, Centroid};
use crate::digest::compress::compress_sorted;
use crate::digest::scale::{max_cluster_weight, means_match};
use crate::error::{WdError, WdResult};

/// Valid compression range, enforced at construction.
pub const MIN_COMPRESSION: f64 = 20.0;
pub const MAX_COMPRESSION: f64 = 1000.0;

/// A compressible, centroid-based rank summary of a multiset of real values.
///
/// Insertion-based: each `add` binary-searches the (lazily) sorted centroid
/// sequence, merges in place when the candidate's mean matches within a tight
/// epsilon and the scale bound permits, and inserts a new centroid otherwise.
/// Order may drift after in-place merges and is restored just-in-time before
/// any operation that reads rank order.
///
/// - `count`, `sum` are kept in f64 for stable accumulation.
/// - `min`/`max` track raw inputs exactly; `quantile(0)`/`quantile(1)` return
///   them verbatim.
/// - The compression factor is fixed at construction and never resized.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    centroids: Vec<Centroid>,
    compression: f64,
    count: f64,
    sum: f64,
    min: OrderedFloat<f64>,
    max: OrderedFloat<f64>,
    unsorted: bool,
    compacted: bool,
}

impl Digest {
    /// Create an empty digest. Fails on a compression factor outside
    /// `[20, 1000]`.
    pub fn new(compression: f64) -> WdResult<Self> {
        if !compression.is_finite() || !(MIN_COMPRESSION..=MAX_COMPRESSION).contains(&compression) {
            return Err(WdError::InvalidCompression { got: compression });
        }
        Ok(Digest {
            centroids: Vec::new(),
            compression,
            count: 0.0,
            sum: 0.0,
            min: OrderedFloat::from(f64::INFINITY),
            max: OrderedFloat::from(f64::NEG_INFINITY),
            unsorted: false,
            compacted: false,
        })
    }

    /* ===========================
     * Accessors
     * =========================== */

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }
    /// Total weight (∑w). Equals the sample count for unit-weight inserts.
    #[inline]
    pub fn count(&self) -> f64 {
        self.count
    }
    /// Sum of raw values (∑x·w).
    #[inline]
    pub fn sum(&self) -> f64 {
        self.sum
    }
    /// Mean of the represented distribution, `0.0` when empty.
    #[inline]
    pub fn mean(&self) -> f64 {
        if self.count > 0.0 {
            self.sum / self.count
        } else {
            0.0
        }
    }
    /// Minimum raw value observed; NaN when empty.
    #[inline]
    pub fn min(&self) -> f64 {
        if self.is_empty() {
            f64::NAN
        } else {
            self.min.into_inner()
        }
    }
    /// Maximum raw value observed; NaN when empty.
    #[inline]
    pub fn max(&self) -> f64 {
        if self.is_empty() {
            f64::NAN
        } else {
            self.max.into_inner()
        }
    }
    #[inline]
    pub fn compression(&self) -> f64 {
        self.compression
    }
    #[inline]
    pub fn centroid_count(&self) -> usize {
        self.centroids.len()
    }
    /// Borrow the internal centroids (order only guaranteed right after a
    /// rank-reading operation).
    #[inline]
    pub fn centroids(&self) -> &[Centroid] {
        &self.centroids
    }

    /* ===========================
     * Mutation
     * =========================== */

    /// Insert `value` with unit weight.
    #[inline]
    pub fn add(&mut self, value: f64) -> WdResult<()> {
        self.add_weighted(value, 1.0)
    }

    /// Insert `value` with `weight`.
    ///
    /// Rejects non-finite values and non-positive/non-finite weights before
    /// touching any state; a failed call leaves the digest exactly as it was.
    pub fn add_weighted(&mut self, value: f64, weight: f64) -> WdResult<()> {
        if !value.is_finite() {
            return Err(WdError::NonFiniteInput {
                context: "sample value",
            });
        }
        if !weight.is_finite() || weight <= 0.0 {
            return Err(WdError::InvalidWeight { got: weight });
        }

        self.min = self.min.min(OrderedFloat::from(value));
        self.max = self.max.max(OrderedFloat::from(value));
        self.count += weight;
        self.sum += value * weight;
        self.compacted = false;

        if self.centroids.is_empty() {
            self.centroids.push(Centroid::new(value, weight));
            return Ok(());
        }

        self.ensure_sorted();
        let pos = self.centroids.partition_point(|c| c.mean() < value);

        // Merge-vs-insert: a neighbor whose mean matches within epsilon may
        // absorb the sample, provided it stays within the scale bound for its
        // rank position.
        if let Some(i) = self.matching_neighbor(pos, value) {
            let preceding: f64 = self.centroids[..i].iter().map(|c| c.weight()).sum();
            let q = (preceding + 0.5 * self.centroids[i].weight()) / self.count;
            let cap = max_cluster_weight(self.count, q, self.compression);
            if self.centroids[i].weight() + weight <= cap {
                self.centroids[i].add(value, weight);
                // The absorbed sample can nudge the mean past a neighbor.
                if !self.neighborhood_ordered(i) {
                    self.unsorted = true;
                }
                self.maybe_compress();
                return Ok(());
            }
        }

        self.centroids.insert(pos, Centroid::new(value, weight));
        self.maybe_compress();
        Ok(())
    }

    /// Re-add every centroid of `other` into `self`. Works for any pair of
    /// compression factors; `self` may be temporarily over-sized until its
    /// next compression.
    pub fn merge(&mut self, other: &Digest) -> WdResult<()> {
        for c in other.centroids.iter() {
            self.add_weighted(c.mean(), c.weight())?;
        }
        // Centroid means under-report the raw extremes; fold them in exactly.
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
        Ok(())
    }

    /// Reset to the empty state. The compression factor is retained.
    pub fn clear(&mut self) {
        self.centroids.clear();
        self.count = 0.0;
        self.sum = 0.0;
        self.min = OrderedFloat::from(f64::INFINITY);
        self.max = OrderedFloat::from(f64::NEG_INFINITY);
        self.unsorted = false;
        self.compacted = false;
    }

    /// Compress the centroid sequence down to at most `2·compression`
    /// clusters. Idempotent: immediately repeated calls are no-ops.
    pub fn compress(&mut self) {
        if self.compacted || self.centroids.len() <= 1 {
            self.compacted = true;
            return;
        }
        self.ensure_sorted();
        self.centroids = compress_sorted(&self.centroids, self.count, self.compression);
        self.compacted = true;
    }

    /* ===========================
     * Internals
     * =========================== */

    #[inline]
    pub(crate) fn ensure_sorted(&mut self) {
        if self.unsorted {
            self.centroids.sort_unstable();
            self.unsorted = false;
        }
        debug_assert!(is_sorted_by_mean(&self.centroids));
    }

    #[inline]
    fn maybe_compress(&mut self) {
        if self.centroids.len() > (2.0 * self.compression) as usize {
            self.compress();
        }
    }

    /// Of the centroids adjacent to the insertion point, the one whose mean
    /// matches `value` within epsilon (preferring the closer one).
    fn matching_neighbor(&self, pos: usize, value: f64) -> Option<usize> {
        let right = self
            .centroids
            .get(pos)
            .filter(|c| means_match(c.mean(), value))
            .map(|_| pos);
        let left = pos
            .checked_sub(1)
            .filter(|&i| means_match(self.centroids[i].mean(), value));
        match (left, right) {
            (Some(l), Some(r)) => {
                let dl = (self.centroids[l].mean() - value).abs();
                let dr = (self.centroids[r].mean() - value).abs();
                Some(if dl <= dr { l } else { r })
            }
            (l, r) => l.or(r),
        }
    }

    #[inline]
    fn neighborhood_ordered(&self, i: usize) -> bool {
        let m = self.centroids[i].mean();
        let left_ok = i == 0 || self.centroids[i - 1].mean() <= m;
        let right_ok = i + 1 >= self.centroids.len() || m <= self.centroids[i + 1].mean();
        left_ok && right_ok
    }
}
