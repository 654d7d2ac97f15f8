//! Quantile and CDF evaluation for [`Digest`].
//!
//! # Semantics
//! - **Quantile**: map `q ∈ [0,1]` to a target rank `q·N` and walk the sorted
//!   centroids until the rank falls inside a centroid's weight span; return
//!   that centroid's mean. A rank landing exactly on the boundary between two
//!   centroids averages the two bounding means.
//! - **Edges**: `quantile(0)`/`quantile(1)` return the exact observed
//!   `min`/`max`; `q` outside `[0,1]` is a caller error, not clamped.
//! - **CDF**: half-weight placement — each centroid contributes half its mass
//!   below its mean and half above — with linear interpolation between
//!   adjacent means and clamps to `{0, 1}` outside the observed support.
//!
//! # Guarantees
//! - `quantile` is monotone in `q`; `cdf` is non-decreasing in the probe.
//! - Empty digest → `NaN` (a "no data yet" sentinel, distinct from the
//!   out-of-range error).
//!
//! Both entry points take `&mut self`: rank order may have drifted since the
//! last query and is restored just-in-time.

use rayon::prelude::*;

use crate::digest::centroid::Centroid;
use crate::digest::Digest;
use crate::error::{WdError, WdResult};

/// Crossover for parallel CDF evaluation with Rayon. Below this size the
/// scalar loop wins; Rayon setup has a fixed cost.
const PAR_MIN: usize = 32_768;

impl Digest {
    /// Estimate the value at quantile `q`.
    ///
    /// - `q` outside `[0, 1]` (or NaN) → `Err(QuantileOutOfRange)`.
    /// - Empty digest → `Ok(NaN)`.
    /// - `q == 0.0` / `q == 1.0` → exact `min` / `max`.
    pub fn quantile(&mut self, q: f64) -> WdResult<f64> {
        if !(0.0..=1.0).contains(&q) {
            return Err(WdError::QuantileOutOfRange { got: q });
        }
        if self.is_empty() {
            return Ok(f64::NAN);
        }
        if q == 0.0 {
            return Ok(self.min());
        }
        if q == 1.0 {
            return Ok(self.max());
        }

        self.ensure_sorted();
        let target = q * self.count();
        let cents = self.centroids();
        let mut cum = 0.0_f64;
        for (i, c) in cents.iter().enumerate() {
            let w = c.weight();
            if target < cum + w {
                // Exactly on the seam between two centroids: average the
                // bounding means rather than biasing to either side.
                if target == cum && i > 0 {
                    return Ok(0.5 * (cents[i - 1].mean() + c.mean()));
                }
                return Ok(c.mean());
            }
            cum += w;
        }
        // Floating-point slack can leave target == N; the last centroid owns it.
        Ok(cents[cents.len() - 1].mean())
    }

    /// Fraction of mass at or below `x`, in `[0, 1]`.
    ///
    /// Empty digest or NaN probe → `NaN`.
    pub fn cdf(&mut self, x: f64) -> f64 {
        self.ensure_sorted();
        let prefix = half_weight_prefix(self.centroids());
        cdf_kernel(
            x,
            self.centroids(),
            &prefix,
            self.count(),
            self.min(),
            self.max(),
        )
    }

    /// Batch CDF evaluation; switches to Rayon above a size threshold.
    pub fn cdf_many(&mut self, xs: &[f64]) -> Vec<f64> {
        self.ensure_sorted();
        if self.is_empty() {
            return vec![f64::NAN; xs.len()];
        }
        let prefix = half_weight_prefix(self.centroids());
        let (cents, n) = (self.centroids(), self.count());
        let (lo, hi) = (self.min(), self.max());

        if xs.len() >= PAR_MIN {
            xs.par_iter()
                .with_min_len(4096)
                .map(|&x| cdf_kernel(x, cents, &prefix, n, lo, hi))
                .collect()
        } else {
            xs.iter()
                .map(|&x| cdf_kernel(x, cents, &prefix, n, lo, hi))
                .collect()
        }
    }
}

/// Cumulative weight strictly before each centroid.
fn half_weight_prefix(cents: &[Centroid]) -> Vec<f64> {
    let mut prefix = Vec::with_capacity(cents.len());
    let mut run = 0.0_f64;
    for c in cents {
        prefix.push(run);
        run += c.weight();
    }
    prefix
}

/// Piecewise-linear CDF through the anchors
/// `(min, 0) .. (mean_i, (prefix_i + w_i/2)/N) .. (max, 1)`.
fn cdf_kernel(x: f64, cents: &[Centroid], prefix: &[f64], n: f64, lo: f64, hi: f64) -> f64 {
    if x.is_nan() || cents.is_empty() {
        return f64::NAN;
    }
    if x < lo {
        return 0.0;
    }
    if x >= hi {
        return 1.0;
    }

    let mut prev_x = lo;
    let mut prev_y = 0.0_f64;
    for (i, c) in cents.iter().enumerate() {
        let cx = c.mean();
        let cy = (prefix[i] + 0.5 * c.weight()) / n;
        if x < cx {
            let gap = cx - prev_x;
            return if gap > 0.0 {
                prev_y + (x - prev_x) / gap * (cy - prev_y)
            } else {
                // Degenerate gap: step to the centroid's midpoint mass.
                cy
            };
        }
        prev_x = cx;
        prev_y = cy;
    }
    // Between the last mean and max.
    let gap = hi - prev_x;
    if gap > 0.0 {
        prev_y + (x - prev_x) / gap * (1.0 - prev_y)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::test_helpers::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn digest_of(values: &[f64], compression: f64) -> Digest {
        let mut d = Digest::new(compression).expect("valid compression");
        for &v in values {
            d.add(v).expect("finite input");
        }
        d
    }

    #[test]
    fn out_of_range_probe_is_an_error() {
        let mut d = digest_of(&[1.0, 2.0, 3.0], 100.0);
        assert!(matches!(
            d.quantile(1.5),
            Err(WdError::QuantileOutOfRange { .. })
        ));
        assert!(matches!(
            d.quantile(-0.1),
            Err(WdError::QuantileOutOfRange { .. })
        ));
        assert!(matches!(
            d.quantile(f64::NAN),
            Err(WdError::QuantileOutOfRange { .. })
        ));
    }

    #[test]
    fn empty_digest_returns_nan_sentinel() {
        let mut d = Digest::new(100.0).expect("valid compression");
        assert!(d.quantile(0.5).expect("in range").is_nan());
        assert!(d.cdf(1.0).is_nan());
        assert!(d.cdf_many(&[1.0, 2.0]).iter().all(|p| p.is_nan()));
    }

    #[test]
    fn edges_return_exact_min_and_max() {
        let mut rng = StdRng::seed_from_u64(5);
        let values: Vec<f64> = (0..5000).map(|_| rng.random_range(-1e6..1e6)).collect();
        let mut d = digest_of(&values, 50.0);
        let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert_exact("Q(0)", lo, d.quantile(0.0).expect("in range"));
        assert_exact("Q(1)", hi, d.quantile(1.0).expect("in range"));
    }

    #[test]
    fn quantiles_are_monotone() {
        let mut rng = StdRng::seed_from_u64(9);
        let values: Vec<f64> = (0..10_000).map(|_| rng.random_range(0.0..1.0)).collect();
        let mut d = digest_of(&values, 100.0);
        let grid: Vec<f64> = (0..=100)
            .map(|i| d.quantile(i as f64 / 100.0).expect("in range"))
            .collect();
        assert_monotone_chain("quantile grid", &grid);
    }

    #[test]
    fn boundary_seam_averages_bounding_means() {
        // Two unit centroids at 1 and 2: rank 1.0 sits exactly on the seam.
        let mut d = digest_of(&[1.0, 2.0], 100.0);
        assert_exact("seam median", 1.5, d.quantile(0.5).expect("in range"));
    }

    #[test]
    fn uniform_ramp_quantiles_are_close() {
        let values: Vec<f64> = (1..=1000).map(|i| i as f64).collect();
        let mut d = digest_of(&values, 100.0);
        for &(q, expect) in &[(0.1, 100.0), (0.25, 250.0), (0.5, 500.0), (0.9, 900.0)] {
            let got = d.quantile(q).expect("in range");
            assert_rel_close(&format!("Q({})", q), expect, got, 0.05);
        }
        // Tails are sharper than the interior by construction.
        assert_rel_close("Q(0.999)", 999.0, d.quantile(0.999).expect("in range"), 0.01);
        assert_rel_close("Q(0.001)", 1.0, d.quantile(0.001).expect("in range"), 1.0);
    }

    #[test]
    fn cdf_is_bounded_and_monotone() {
        let mut rng = StdRng::seed_from_u64(13);
        let values: Vec<f64> = (0..5000).map(|_| rng.random_range(-50.0..50.0)).collect();
        let mut d = digest_of(&values, 100.0);

        let probes: Vec<f64> = (-60..=60).map(|i| i as f64).collect();
        let out = d.cdf_many(&probes);
        let mut prev = -1.0;
        for (i, &p) in out.iter().enumerate() {
            assert!(
                (0.0..=1.0).contains(&p),
                "cdf[{}]={} out of [0,1]",
                i,
                p
            );
            assert!(p + 1e-12 >= prev, "non-monotone at {}", i);
            prev = p;
        }
        assert_exact("below support", 0.0, out[0]);
        assert_exact("above support", 1.0, out[out.len() - 1]);
    }

    #[test]
    fn cdf_roundtrips_quantile_within_tolerance() {
        let mut rng = StdRng::seed_from_u64(17);
        let values: Vec<f64> = (0..20_000).map(|_| rng.random_range(0.0..100.0)).collect();
        let mut d = digest_of(&values, 200.0);
        for &q in &[0.1, 0.3, 0.5, 0.7, 0.9] {
            let x = d.quantile(q).expect("in range");
            let back = d.cdf(x);
            assert_rel_close(&format!("cdf(Q({}))", q), q, back, 0.05);
        }
    }

    #[test]
    fn single_point_mass_cdf() {
        let mut d = digest_of(&[7.0, 7.0, 7.0], 100.0);
        assert_exact("below", 0.0, d.cdf(6.9));
        assert_exact("at max", 1.0, d.cdf(7.0));
        assert_exact("above", 1.0, d.cdf(7.1));
    }
}
