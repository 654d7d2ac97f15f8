//! Scale function: the weight bound that shapes cluster sizes.
//!
//! A cluster sitting at local quantile `q` of a digest holding total weight
//! `n` may absorb at most `4·n·q·(1−q)/δ`, where `δ` is the compression
//! factor. The bound peaks at the median and collapses toward the tails, so
//! extreme percentiles are resolved by near-singleton clusters while the
//! middle of the distribution compresses aggressively. After a full
//! compression pass the cluster count stays below `2·δ`.

/// Two means closer than this (relative to magnitude) are treated as equal
/// when deciding merge-vs-insert on the hot insert path.
pub(crate) const MERGE_EPS: f64 = 1e-9;

/// Maximum weight a cluster at local quantile `q` may hold.
#[inline]
pub(crate) fn max_cluster_weight(total: f64, q: f64, compression: f64) -> f64 {
    let q = q.clamp(0.0, 1.0);
    4.0 * total * q * (1.0 - q) / compression
}

/// Mean equality within [`MERGE_EPS`], scaled by magnitude.
#[inline]
pub(crate) fn means_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= MERGE_EPS * a.abs().max(b.abs()).max(1.0)
}
