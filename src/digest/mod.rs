pub mod centroid;
pub mod test_helpers;

// Internal building blocks
mod compress;
mod digest;
mod quantile;
mod scale;

// Public surface
pub use centroid::Centroid;
pub use digest::{Digest, MAX_COMPRESSION, MIN_COMPRESSION};
