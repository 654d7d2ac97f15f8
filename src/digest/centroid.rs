use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A centroid summarizes a cluster in the digest: the weighted mean of the
/// observations it absorbed plus their total weight.
///
/// Invariant: `weight > 0`. Folding a `(value, weight)` pair into a centroid
/// is commutative and associative up to floating-point rounding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Centroid {
    mean: OrderedFloat<f64>,
    weight: OrderedFloat<f64>,
}

impl PartialOrd for Centroid {
    fn partial_cmp(&self, other: &Centroid) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Centroid {
    fn cmp(&self, other: &Centroid) -> Ordering {
        // Rank order is by mean; equal means compare by weight for a total order.
        self.mean
            .cmp(&other.mean)
            .then(self.weight.cmp(&other.weight))
    }
}

impl Centroid {
    #[inline]
    pub fn new(mean: f64, weight: f64) -> Self {
        debug_assert!(weight > 0.0);
        Centroid {
            mean: OrderedFloat::from(mean),
            weight: OrderedFloat::from(weight),
        }
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        self.mean.into_inner()
    }
    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight.into_inner()
    }

    /// Fold `(value, weight)` into this centroid: weighted mean update, weight sum.
    #[inline]
    pub fn add(&mut self, value: f64, weight: f64) {
        let w0 = self.weight.into_inner();
        let m0 = self.mean.into_inner();
        let new_w = w0 + weight;
        self.mean = OrderedFloat::from((m0 * w0 + value * weight) / new_w);
        self.weight = OrderedFloat::from(new_w);
    }
}

/// Non-decreasing by mean.
#[inline]
pub fn is_sorted_by_mean(cs: &[Centroid]) -> bool {
    cs.windows(2).all(|w| w[0].mean() <= w[1].mean())
}
