use crate::metrics::snapshot::{StatValue, StatsSnapshot};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Named counters and gauges for one crawl run.
///
/// Clones share the same underlying values, so the engine, the middleware and
/// the CLI can all hold one.
#[derive(Clone)]
pub struct StatsCollector {
    values: Arc<Mutex<BTreeMap<String, StatValue>>>,
    start_time: Arc<Instant>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self {
            values: Arc::new(Mutex::new(BTreeMap::new())),
            start_time: Arc::new(Instant::now()),
        }
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, StatValue>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn inc_value(&self, key: impl Into<String>) {
        self.inc_by(key, 1);
    }

    pub fn inc_by(&self, key: impl Into<String>, count: u64) {
        let mut values = self.values();
        let entry = values.entry(key.into()).or_insert(StatValue::Count(0));
        *entry = match *entry {
            StatValue::Count(n) => StatValue::Count(n + count),
            StatValue::Float(f) => StatValue::Float(f + count as f64),
        };
    }

    pub fn set_value(&self, key: impl Into<String>, value: f64) {
        self.values().insert(key.into(), StatValue::Float(value));
    }

    pub fn get_count(&self, key: &str) -> Option<u64> {
        self.values().get(key).map(StatValue::as_u64)
    }

    pub fn get_value(&self, key: &str) -> Option<f64> {
        self.values().get(key).map(StatValue::as_f64)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            values: self.values().clone(),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}
