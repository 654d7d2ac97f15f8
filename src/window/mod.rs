pub mod clock;
pub mod config;
pub mod engine;
pub mod pool;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{WindowConfig, WindowConfigBuilder};
pub use engine::{AnalyticsSnapshot, RateSnapshot, WindowedAnalytics};
pub use pool::ScratchPool;
