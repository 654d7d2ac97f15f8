//! Approximate streaming quantiles with a moving-time-horizon engine.
//!
//! Two layers:
//!
//! * [`Digest`] — a centroid digest for one-pass quantile/CDF estimation
//!   over unbounded streams in bounded memory. Tunable accuracy via a
//!   compression factor; exact at the extremes, tightest near the tails.
//! * [`WindowedAnalytics`] — wraps a live digest with a trailing time
//!   window: raw observations are buffered alongside the sketch, expired
//!   ones are lazily evicted, and the digest is rebuilt from survivors so
//!   queries only ever reflect the window.
//!
//! ```
//! use windigest::Digest;
//!
//! let mut d = Digest::new(100.0)?;
//! for v in 1..=1_000 {
//!     d.add(v as f64)?;
//! }
//! let median = d.quantile(0.5)?;
//! assert!((median - 500.0).abs() < 25.0);
//! # Ok::<(), windigest::WdError>(())
//! ```

pub mod digest;
pub mod error;
pub mod window;

pub use digest::{Centroid, Digest, MAX_COMPRESSION, MIN_COMPRESSION};
pub use error::{WdError, WdResult};
pub use window::{
    AnalyticsSnapshot, Clock, ManualClock, RateSnapshot, ScratchPool, SystemClock, WindowConfig,
    WindowConfigBuilder, WindowedAnalytics,
};

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;
