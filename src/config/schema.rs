use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CrawlConfig {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default)]
    #[validate(length(min = 1))]
    pub start_urls: Vec<String>,

    /// Fetch API arguments attached to every start request
    #[serde(default)]
    pub request_args: Map<String, Value>,

    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1))]
    pub concurrency: usize,

    /// Requests in flight per download slot
    #[serde(default = "default_slot_concurrency")]
    #[validate(range(min = 1))]
    pub slot_concurrency: usize,

    #[serde(default = "default_delay")]
    pub delay_ms: u64,

    #[serde(default)]
    pub output: Option<OutputConfig>,

    #[serde(default)]
    #[validate]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Optional path to a parent configuration file to inherit from
    #[serde(default)]
    pub extends: Option<String>,
}

/// Raw fetch API settings as written in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct FetchSettings {
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub enabled: bool,

    #[serde(default)]
    pub apikey: Option<String>,

    #[serde(default)]
    pub apipass: Option<String>,

    #[serde(default)]
    #[validate(url)]
    pub url: Option<String>,

    #[serde(default)]
    pub download_slot_policy: DownloadSlotPolicy,

    #[serde(default)]
    pub default_args: Map<String, Value>,

    #[serde(default)]
    pub on_error: Option<OnError>,

    /// Older switch, superseded by `on_error`
    #[serde(default)]
    pub raise_on_error: Option<bool>,

    /// Name of a spider-provided retry predicate
    #[serde(default)]
    pub should_retry: Option<String>,

    #[serde(default)]
    pub retry_times: Option<u32>,
}

impl FetchSettings {
    /// An explicit `on_error` wins over the legacy boolean; neither means raise.
    pub fn effective_on_error(&self) -> OnError {
        match (self.on_error, self.raise_on_error) {
            (Some(policy), _) => policy,
            (None, Some(true)) => OnError::Raise,
            (None, Some(false)) => OnError::Warn,
            (None, None) => OnError::Raise,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_times")]
    pub times: u32,

    #[serde(default = "default_priority_adjust")]
    pub priority_adjust: i32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            times: default_retry_times(),
            priority_adjust: default_priority_adjust(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadSlotPolicy {
    /// One slot per target host
    #[default]
    Domain,
    /// Every wrapped request shares one slot
    Single,
    /// Leave slot assignment to the engine
    Default,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Raise,
    Warn,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputConfig {
    Console,
    Json { path: String },
}

fn default_concurrency() -> usize {
    2
}

fn default_slot_concurrency() -> usize {
    8
}

fn default_delay() -> u64 {
    500
}

fn default_retry_times() -> u32 {
    2
}

fn default_priority_adjust() -> i32 {
    -1
}

/// Parses the loose boolean spellings people put in settings files.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) => {
            parse_flag(&s).ok_or_else(|| D::Error::custom(format!("invalid boolean: {}", s)))
        }
        Value::Null => Ok(false),
        other => Err(D::Error::custom(format!("invalid boolean: {}", other))),
    }
}
