pub mod collector;
pub mod latency;
pub mod snapshot;

pub use collector::StatsCollector;
pub use latency::{Clock, LatencyAccumulator, ManualClock, SystemClock};
pub use snapshot::{StatValue, StatsSnapshot};
