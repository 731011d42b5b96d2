use crate::config::schema::{DownloadSlotPolicy, FetchSettings, OnError, RetrySettings};
use crate::error::{FetchError, Result};
use crate::metrics::{Clock, LatencyAccumulator, StatsCollector, SystemClock};
use crate::middleware::retry::{get_retry_request, RetryPolicy};
use crate::middleware::settings::{FetchConfig, JOB_KEY_ENV};
use crate::middleware::{DownloaderMiddleware, ResponseAction};
use crate::request::{FetchContext, Request, Timing, UpstreamResponse};
use crate::response::Response;
use crate::spider::Spider;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE,
};
use reqwest::Method;
use serde_json::{Map, Value};
use std::sync::Arc;
use url::Url;

pub const STATS_PREFIX: &str = "crawlera_fetch";
pub const SINGLE_SLOT: &str = "__crawlera_fetch__";
pub const ERROR_HEADER: &str = "x-crawlera-error";
pub const JOB_ID_HEADER: &str = "x-crawlera-jobid";

/// Tunnels spider requests through the fetch API and unwraps its replies.
pub struct FetchMiddleware {
    settings: Option<(FetchSettings, RetrySettings)>,
    config: Option<FetchConfig>,
    stats: StatsCollector,
    clock: Arc<dyn Clock>,
    latency: LatencyAccumulator,
}

impl FetchMiddleware {
    /// Middleware driven by file settings; stays disabled until [`open`](DownloaderMiddleware::open).
    pub fn from_settings(settings: FetchSettings, retry: RetrySettings, stats: StatsCollector) -> Self {
        Self {
            settings: Some((settings, retry)),
            config: None,
            stats,
            clock: Arc::new(SystemClock),
            latency: LatencyAccumulator::new(),
        }
    }

    /// Middleware enabled with an already resolved config.
    pub fn new(config: FetchConfig, stats: StatsCollector) -> Self {
        Self {
            settings: None,
            config: Some(config),
            stats,
            clock: Arc::new(SystemClock),
            latency: LatencyAccumulator::new(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> Option<&FetchConfig> {
        self.config.as_ref()
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    fn key(suffix: &str) -> String {
        format!("{}/{}", STATS_PREFIX, suffix)
    }

    fn download_slot(&self, request: &Request, config: &FetchConfig) -> Option<String> {
        match config.download_slot_policy {
            DownloadSlotPolicy::Domain => request.download_slot.clone().or_else(|| {
                Url::parse(&request.url)
                    .ok()
                    .and_then(|url| url.host_str().map(str::to_string))
            }),
            DownloadSlotPolicy::Single => Some(SINGLE_SLOT.to_string()),
            DownloadSlotPolicy::Default => request.download_slot.clone(),
        }
    }

    fn payload(request: &Request, config: &FetchConfig, args: &Map<String, Value>) -> Value {
        let mut body = Map::new();
        body.insert("url".into(), Value::String(request.url.clone()));
        if request.method != Method::GET {
            body.insert("method".into(), Value::String(request.method.to_string()));
        }
        body.insert("body".into(), Value::String(request.body_text()));
        for (key, value) in config.default_args.iter().chain(args.iter()) {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }

    fn record_latency(&self, ctx: &mut FetchContext) {
        let now = self.clock.now();
        let timing = ctx.timing.get_or_insert(Timing {
            start_ts: now,
            ..Timing::default()
        });
        let latency = now - timing.start_ts;
        timing.end_ts = Some(now);
        timing.latency = Some(latency);

        let max = self.latency.record(latency);
        self.stats.set_value(Self::key("max_latency"), max);
    }

    /// Looks for an error in fixed order: proxy header, undecodable body, error in the envelope.
    fn classify(original: &Request, response: &Response) -> std::result::Result<Value, FetchError> {
        if let Some(message) = response.header(ERROR_HEADER).filter(|m| !m.is_empty()) {
            return Err(FetchError::Proxy {
                code: message.to_string(),
                message: format!(
                    "Error downloading {} (status: {}, X-Crawlera-Error header: {})",
                    original, response.status, message
                ),
            });
        }

        let envelope: Value = serde_json::from_slice(&response.body).map_err(|e| {
            FetchError::Decode {
                message: format!(
                    "Error decoding {} (status: {}, message: {}, lineno: {}, colno: {})",
                    original, response.status, e, e.line(), e.column()
                ),
                line: e.line(),
                column: e.column(),
            }
        })?;
        if !envelope.is_object() {
            return Err(FetchError::Decode {
                message: format!(
                    "Error decoding {} (status: {}, message: expected a JSON object)",
                    original, response.status
                ),
                line: 1,
                column: 1,
            });
        }

        let server_error = truthy(&envelope, "crawlera_error").or_else(|| truthy(&envelope, "error_code"));
        if let Some(code) = server_error {
            let message = truthy(&envelope, "body").or_else(|| truthy(&envelope, "message"));
            let request_id = truthy(&envelope, "id").or_else(|| truthy(&envelope, "uncork_id"));
            let original_status = truthy(&envelope, "original_status");
            return Err(FetchError::Upstream {
                code: code.clone(),
                message: format!(
                    "Error downloading {} (Original status: {}, Fetch API error message: {}, Request ID: {})",
                    original,
                    original_status.as_deref().unwrap_or("unknown"),
                    message.as_deref().unwrap_or("None"),
                    request_id.as_deref().unwrap_or("unknown"),
                ),
                request_id,
            });
        }

        Ok(envelope)
    }

    fn handle_error(
        &self,
        config: &FetchConfig,
        original: &Request,
        response: Response,
        error: FetchError,
    ) -> Result<ResponseAction> {
        self.stats.inc_value(Self::key("response_error"));
        self.stats
            .inc_value(format!("{}/response_error/{}", STATS_PREFIX, error.code()));

        match config.on_error {
            OnError::Raise => Err(error.into()),
            OnError::Warn => {
                log::warn!("{}", error);
                Ok(ResponseAction::Response(response))
            }
            OnError::Retry => {
                log::warn!("{}", error);
                Ok(self.retry_or(config, original, error.code(), "retry/error", response))
            }
        }
    }

    fn retry_or(
        &self,
        config: &FetchConfig,
        original: &Request,
        reason: &str,
        base: &str,
        fallback: Response,
    ) -> ResponseAction {
        let policy = RetryPolicy {
            max_retry_times: config.retry_times,
            priority_adjust: config.priority_adjust,
        };
        match get_retry_request(original, reason, policy, &self.stats, &Self::key(base)) {
            Some(retry) => ResponseAction::Retry(retry),
            None => ResponseAction::Response(fallback),
        }
    }
}

impl DownloaderMiddleware for FetchMiddleware {
    fn open(&mut self, spider: &dyn Spider) {
        let Some((settings, retry)) = &self.settings else {
            if let Some(config) = &self.config {
                log::info!(
                    "Using Fetch API at {} with apikey {}",
                    config.url,
                    config.masked_apikey()
                );
            }
            return;
        };

        let enabled = match spider.fetch_enabled() {
            Some(enabled) => {
                if !enabled {
                    log::info!("Fetch API disabled (spider {} override)", spider.name());
                }
                enabled
            }
            None => {
                if !settings.enabled {
                    log::info!("Fetch API disabled (fetch.enabled setting)");
                }
                settings.enabled
            }
        };
        if !enabled {
            self.config = None;
            return;
        }

        let job_id = std::env::var(JOB_KEY_ENV).ok().filter(|id| !id.is_empty());
        self.config = match FetchConfig::resolve(settings, retry, spider, job_id) {
            Ok(config) => {
                log::info!(
                    "Using Fetch API at {} with apikey {}",
                    config.url,
                    config.masked_apikey()
                );
                Some(config)
            }
            Err(e) => {
                log::info!("{}", e);
                None
            }
        };
    }

    fn process_request(&self, request: &Request) -> Option<Request> {
        let config = self.config.as_ref()?;

        let ctx = request.fetch.clone().unwrap_or_default();
        if ctx.skip || ctx.original_request.is_some() || ctx.upstream_response.is_some() {
            return None;
        }

        self.stats.inc_value(Self::key("request_count"));
        self.stats.inc_value(format!(
            "{}/request_method_count/{}",
            STATS_PREFIX, request.method
        ));

        let payload = Self::payload(request, config, &ctx.args);

        let mut wrapped = request.clone();
        wrapped.download_slot = self.download_slot(request, config);
        wrapped.url = config.url.clone();
        wrapped.method = Method::POST;
        wrapped.body = payload.to_string().into_bytes();

        let json = HeaderValue::from_static("application/json");
        wrapped.headers.insert(CONTENT_TYPE, json.clone());
        wrapped.headers.insert(ACCEPT, json);
        if !config.apikey.is_empty() {
            match HeaderValue::from_str(&config.auth_header()) {
                Ok(auth) => {
                    wrapped.headers.insert(AUTHORIZATION, auth);
                }
                Err(e) => log::warn!("Sending {} without authorization: {}", request, e),
            }
        }
        if let Some(job_id) = &config.job_id {
            match HeaderValue::from_str(job_id) {
                Ok(value) => {
                    wrapped.headers.insert(JOB_ID_HEADER, value);
                }
                Err(e) => log::warn!("Sending {} without job id header ({:?}): {}", request, job_id, e),
            }
        }

        wrapped.fetch = Some(FetchContext {
            original_request: Some(Box::new(request.snapshot())),
            timing: Some(Timing {
                start_ts: self.clock.now(),
                ..Timing::default()
            }),
            ..ctx
        });
        Some(wrapped)
    }

    fn process_response(&self, request: &mut Request, response: Response) -> Result<ResponseAction> {
        let Some(config) = self.config.as_ref() else {
            return Ok(ResponseAction::Response(response));
        };
        let Some(ctx) = request.fetch.as_mut() else {
            return Ok(ResponseAction::Response(response));
        };
        if ctx.skip {
            return Ok(ResponseAction::Response(response));
        }
        let Some(original) = ctx.original_request.as_deref().cloned() else {
            return Ok(ResponseAction::Response(response));
        };

        self.stats.inc_value(Self::key("response_count"));
        self.record_latency(ctx);
        let timing = ctx.timing;
        self.stats.inc_value(format!(
            "{}/api_status_count/{}",
            STATS_PREFIX, response.status
        ));

        let envelope = match Self::classify(&original, &response) {
            Ok(envelope) => envelope,
            Err(error) => return self.handle_error(config, &original, response, error),
        };

        let original_status = envelope
            .get("original_status")
            .and_then(Value::as_u64)
            .and_then(|status| u16::try_from(status).ok())
            .filter(|status| *status != 0);
        self.stats.inc_value(format!(
            "{}/response_status_count/{}",
            STATS_PREFIX,
            original_status.map_or_else(|| "None".to_string(), |s| s.to_string())
        ));

        let body = match envelope.get("body") {
            Some(Value::String(text)) => decode_body(text),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => other.to_string().into_bytes(),
        };
        let mut headers = envelope.get("headers").map(parse_headers).unwrap_or_default();
        headers.remove(CONTENT_ENCODING);
        let url = envelope
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or(&original.url)
            .to_string();

        let upstream = UpstreamResponse::from_response(&response, envelope);
        ctx.upstream_response = Some(upstream.clone());

        let mut page_request = original.clone();
        let page_ctx = page_request.fetch.get_or_insert_with(FetchContext::default);
        page_ctx.timing = timing;
        page_ctx.upstream_response = Some(upstream);

        let rebuilt = Response::new(url, original_status.unwrap_or(200))
            .with_headers(headers)
            .with_body(body)
            .with_request(page_request);

        if let Some(should_retry) = &config.should_retry {
            if should_retry(&rebuilt, &original) {
                return Ok(self.retry_or(config, &original, "should-retry", "retry/should-retry", rebuilt));
            }
        }

        Ok(ResponseAction::Response(rebuilt))
    }

    fn close(&self) {
        if self.config.is_none() {
            return;
        }
        let total = self.latency.total();
        self.stats.set_value(Self::key("total_latency"), total);
        let response_count = self.stats.get_count(&Self::key("response_count")).unwrap_or(0);
        if response_count > 0 {
            self.stats
                .set_value(Self::key("avg_latency"), total / response_count as f64);
        }
    }
}

/// String form of a field unless it is missing, null, false, zero or empty.
fn truthy(envelope: &Value, field: &str) -> Option<String> {
    match envelope.get(field)? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::Array(a) if a.is_empty() => None,
        Value::Object(o) if o.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Bodies may come base64 encoded; anything that is not valid base64 is taken as is.
fn decode_body(text: &str) -> Vec<u8> {
    general_purpose::STANDARD
        .decode(text)
        .unwrap_or_else(|_| text.as_bytes().to_vec())
}

/// Envelope headers are either an object or a list of `{"name", "value"}` pairs.
fn parse_headers(raw: &Value) -> HeaderMap {
    let pairs: Vec<(&str, &Value)> = match raw {
        Value::Object(map) => map.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| Some((item.get("name")?.as_str()?, item.get("value")?)))
            .collect(),
        _ => Vec::new(),
    };

    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => log::debug!("Skipping invalid upstream header {:?}", name),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base64_bodies_are_decoded() {
        assert_eq!(decode_body("Zm9vYmFy"), b"foobar".to_vec());
        assert_eq!(decode_body("foobar"), b"foobar".to_vec());
        assert_eq!(decode_body("<html></html>"), b"<html></html>".to_vec());
    }

    #[test]
    fn headers_parse_from_object_and_list() {
        let from_object = parse_headers(&json!({"fake-header": "true", "x-count": 3}));
        assert_eq!(from_object["fake-header"], "true");
        assert_eq!(from_object["x-count"], "3");

        let from_list = parse_headers(&json!([
            {"name": "Set-Cookie", "value": "a=1"},
            {"name": "Set-Cookie", "value": "b=2"},
            {"value": "nameless"}
        ]));
        assert_eq!(from_list.get_all("set-cookie").iter().count(), 2);
        assert_eq!(from_list.len(), 2);
    }

    #[test]
    fn truthiness_follows_envelope_conventions() {
        let envelope = json!({"a": "", "b": 0, "c": null, "d": "serverbusy", "e": 503});
        assert_eq!(truthy(&envelope, "a"), None);
        assert_eq!(truthy(&envelope, "b"), None);
        assert_eq!(truthy(&envelope, "c"), None);
        assert_eq!(truthy(&envelope, "missing"), None);
        assert_eq!(truthy(&envelope, "d").as_deref(), Some("serverbusy"));
        assert_eq!(truthy(&envelope, "e").as_deref(), Some("503"));
    }

    #[test]
    fn error_header_wins_over_body() {
        let original = Request::new("https://example.org");
        let mut headers = HeaderMap::new();
        headers.insert(ERROR_HEADER, HeaderValue::from_static("bad_proxy_auth"));
        let response = Response::new("http://fetch", 407)
            .with_headers(headers)
            .with_body(r#"{"Bad": "JSON"#);

        let err = FetchMiddleware::classify(&original, &response).unwrap_err();
        assert_eq!(err.code(), "bad_proxy_auth");
        assert_eq!(err.kind(), "proxy");
    }

    #[test]
    fn non_object_envelope_is_a_decode_error() {
        let original = Request::new("https://example.org");
        let response = Response::new("http://fetch", 200).with_body("[1, 2]");
        let err = FetchMiddleware::classify(&original, &response).unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn upstream_error_message_includes_request_id() {
        let original = Request::new("https://example.org");
        let response = Response::new("http://fetch", 200).with_body(
            r#"{"url": "https://example.org", "original_status": 503, "crawlera_error": "serverbusy", "body": "Server busy", "id": "abc"}"#,
        );
        match FetchMiddleware::classify(&original, &response).unwrap_err() {
            FetchError::Upstream { code, message, request_id } => {
                assert_eq!(code, "serverbusy");
                assert_eq!(request_id.as_deref(), Some("abc"));
                assert_eq!(
                    message,
                    "Error downloading <GET https://example.org> (Original status: 503, Fetch API error message: Server busy, Request ID: abc)"
                );
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
