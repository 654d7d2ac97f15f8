//! Engine configuration, validated eagerly at construction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::digest::{MAX_COMPRESSION, MIN_COMPRESSION};
use crate::error::{WdError, WdResult};

fn default_window() -> Duration {
    Duration::from_secs(60)
}
fn default_compression() -> f64 {
    100.0
}
fn default_snapshot_ttl() -> Duration {
    Duration::from_millis(100)
}
fn default_rebuild_min_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_rebuild_fraction() -> f64 {
    0.15
}

/// Configuration for [`WindowedAnalytics`](crate::window::WindowedAnalytics).
///
/// All constraints are checked once, at engine construction; a rejected
/// config is a setup error, never a runtime condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Trailing horizon over which observations stay eligible. Must be > 0.
    #[serde(default = "default_window")]
    pub window: Duration,
    /// Digest compression factor, `[20, 1000]`.
    #[serde(default = "default_compression")]
    pub compression: f64,
    /// How long a computed analytics snapshot may be served from cache.
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl: Duration,
    /// Minimum spacing between rebuild-timer resets.
    #[serde(default = "default_rebuild_min_interval")]
    pub rebuild_min_interval: Duration,
    /// Evicted-to-remaining ratio that, together with the minimum interval,
    /// resets the rebuild timer. Must lie in `(0, 1)`.
    #[serde(default = "default_rebuild_fraction")]
    pub rebuild_fraction: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            window: default_window(),
            compression: default_compression(),
            snapshot_ttl: default_snapshot_ttl(),
            rebuild_min_interval: default_rebuild_min_interval(),
            rebuild_fraction: default_rebuild_fraction(),
        }
    }
}

impl WindowConfig {
    /// Entry point for fluent construction.
    pub fn builder() -> WindowConfigBuilder {
        WindowConfigBuilder::default()
    }

    pub fn validate(&self) -> WdResult<()> {
        if self.window.is_zero() {
            return Err(WdError::InvalidConfig {
                what: "window must be a positive duration",
            });
        }
        if !self.compression.is_finite()
            || !(MIN_COMPRESSION..=MAX_COMPRESSION).contains(&self.compression)
        {
            return Err(WdError::InvalidCompression {
                got: self.compression,
            });
        }
        if !self.rebuild_fraction.is_finite()
            || self.rebuild_fraction <= 0.0
            || self.rebuild_fraction >= 1.0
        {
            return Err(WdError::InvalidConfig {
                what: "rebuild_fraction must lie in (0, 1)",
            });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }
    #[inline]
    pub(crate) fn snapshot_ttl_ms(&self) -> i64 {
        self.snapshot_ttl.as_millis() as i64
    }
    #[inline]
    pub(crate) fn rebuild_min_interval_ms(&self) -> i64 {
        self.rebuild_min_interval.as_millis() as i64
    }
}

/// Builder for [`WindowConfig`].
#[derive(Debug, Clone, Default)]
pub struct WindowConfigBuilder {
    cfg: WindowConfig,
}

impl WindowConfigBuilder {
    pub fn window(mut self, window: Duration) -> Self {
        self.cfg.window = window;
        self
    }
    pub fn compression(mut self, compression: f64) -> Self {
        self.cfg.compression = compression;
        self
    }
    pub fn snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.cfg.snapshot_ttl = ttl;
        self
    }
    pub fn rebuild_min_interval(mut self, interval: Duration) -> Self {
        self.cfg.rebuild_min_interval = interval;
        self
    }
    pub fn rebuild_fraction(mut self, fraction: f64) -> Self {
        self.cfg.rebuild_fraction = fraction;
        self
    }

    /// Validate and produce the config.
    pub fn build(self) -> WdResult<WindowConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
