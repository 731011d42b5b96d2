use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Source of wall-clock timestamps, in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        let now = chrono::Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9
    }
}

/// Clock whose time only moves when told to.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start.to_bits())),
        }
    }

    pub fn set(&self, ts: f64) {
        self.bits.store(ts.to_bits(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    total: f64,
    max: f64,
    count: u64,
}

#[derive(Debug, Default)]
pub struct LatencyAccumulator {
    totals: Mutex<Totals>,
}

impl LatencyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn totals(&self) -> Totals {
        *self.totals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds one sample and returns the running maximum.
    pub fn record(&self, latency: f64) -> f64 {
        let mut totals = self.totals.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        totals.total += latency;
        totals.count += 1;
        if totals.count == 1 || latency > totals.max {
            totals.max = latency;
        }
        totals.max
    }

    pub fn total(&self) -> f64 {
        self.totals().total
    }

    pub fn max(&self) -> f64 {
        self.totals().max
    }

    pub fn count(&self) -> u64 {
        self.totals().count
    }

    pub fn average(&self) -> Option<f64> {
        let totals = self.totals();
        (totals.count > 0).then(|| totals.total / totals.count as f64)
    }
}
