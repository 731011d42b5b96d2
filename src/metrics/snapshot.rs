use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Count(u64),
    Float(f64),
}

impl StatValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            StatValue::Count(n) => n as f64,
            StatValue::Float(f) => f,
        }
    }

    pub fn as_u64(&self) -> u64 {
        match *self {
            StatValue::Count(n) => n,
            StatValue::Float(f) => f as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub values: BTreeMap<String, StatValue>,
    pub elapsed_seconds: f64,
}

impl StatsSnapshot {
    pub fn count(&self, key: &str) -> u64 {
        self.values.get(key).map(StatValue::as_u64).unwrap_or(0)
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).map(StatValue::as_f64)
    }

    pub fn requests_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.count("downloader/response_count") as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }
}
