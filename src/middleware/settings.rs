use crate::config::schema::{DownloadSlotPolicy, FetchSettings, OnError, RetrySettings};
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::spider::Spider;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::HeaderValue;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_FETCH_URL: &str = "http://fetch.crawlera.com:8010/fetch/v2/";
pub const JOB_KEY_ENV: &str = "SHUB_JOBKEY";

/// Decides whether a successfully rebuilt response should be fetched again.
/// Receives the rebuilt response and the original request.
pub type ShouldRetry = Arc<dyn Fn(&Response, &Request) -> bool + Send + Sync>;

/// Fetch API settings resolved for one crawl run.
#[derive(Clone)]
pub struct FetchConfig {
    pub apikey: String,
    pub apipass: String,
    pub url: String,
    pub download_slot_policy: DownloadSlotPolicy,
    pub default_args: Map<String, Value>,
    pub on_error: OnError,
    pub should_retry: Option<ShouldRetry>,
    pub retry_times: u32,
    pub priority_adjust: i32,
    pub job_id: Option<String>,
}

impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("apikey", &self.masked_apikey())
            .field("url", &self.url)
            .field("download_slot_policy", &self.download_slot_policy)
            .field("default_args", &self.default_args)
            .field("on_error", &self.on_error)
            .field("should_retry", &self.should_retry.is_some())
            .field("retry_times", &self.retry_times)
            .field("priority_adjust", &self.priority_adjust)
            .field("job_id", &self.job_id)
            .finish()
    }
}

impl FetchConfig {
    pub fn new(apikey: impl Into<String>) -> Self {
        let retry = RetrySettings::default();
        Self {
            apikey: apikey.into(),
            apipass: String::new(),
            url: DEFAULT_FETCH_URL.to_string(),
            download_slot_policy: DownloadSlotPolicy::default(),
            default_args: Map::new(),
            on_error: OnError::default(),
            should_retry: None,
            retry_times: retry.times,
            priority_adjust: retry.priority_adjust,
            job_id: None,
        }
    }

    /// Builds the runtime config from file settings, resolving the named
    /// retry predicate against the spider.
    pub fn resolve(
        settings: &FetchSettings,
        retry: &RetrySettings,
        spider: &dyn Spider,
        job_id: Option<String>,
    ) -> Result<Self> {
        let apikey = settings
            .apikey
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::Config("Fetch API cannot be used without an apikey".into()))?;

        let should_retry = match &settings.should_retry {
            Some(name) => {
                let predicate = spider.retry_predicate(name);
                if predicate.is_none() {
                    log::warn!(
                        "Could not resolve retry predicate {:?} on spider {}, retries on response content are disabled",
                        name,
                        spider.name()
                    );
                }
                predicate
            }
            None => None,
        };

        let mut config = Self {
            apikey,
            apipass: settings.apipass.clone().unwrap_or_default(),
            url: settings.url.clone().unwrap_or_else(|| DEFAULT_FETCH_URL.to_string()),
            download_slot_policy: settings.download_slot_policy,
            default_args: settings.default_args.clone(),
            on_error: settings.effective_on_error(),
            should_retry,
            retry_times: settings.retry_times.unwrap_or(retry.times),
            priority_adjust: retry.priority_adjust,
            job_id: None,
        };
        match job_id {
            Some(job_id) if HeaderValue::from_str(&job_id).is_ok() => {
                config = config.with_job_id(job_id);
            }
            Some(job_id) => {
                log::warn!("Ignoring job id {:?}: not usable as a header value", job_id);
            }
            None => {}
        }
        Ok(config)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_apipass(mut self, apipass: impl Into<String>) -> Self {
        self.apipass = apipass.into();
        self
    }

    pub fn with_download_slot_policy(mut self, policy: DownloadSlotPolicy) -> Self {
        self.download_slot_policy = policy;
        self
    }

    pub fn with_default_args(mut self, args: Map<String, Value>) -> Self {
        self.default_args = args;
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Response, &Request) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    pub fn with_retry_times(mut self, retry_times: u32) -> Self {
        self.retry_times = retry_times;
        self
    }

    pub fn with_priority_adjust(mut self, priority_adjust: i32) -> Self {
        self.priority_adjust = priority_adjust;
        self
    }

    /// Job ids go out both as a header and as a `job_id` payload argument.
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        self.default_args
            .insert("job_id".to_string(), Value::String(job_id.clone()));
        self.job_id = Some(job_id);
        self
    }

    pub fn auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.apikey, self.apipass);
        format!("Basic {}", general_purpose::STANDARD.encode(credentials))
    }

    pub fn masked_apikey(&self) -> String {
        let prefix: String = self.apikey.chars().take(5).collect();
        format!("{}***", prefix)
    }
}
