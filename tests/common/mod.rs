#![allow(dead_code)]

use async_trait::async_trait;
use crawlera_fetch::middleware::ShouldRetry;
use crawlera_fetch::output::OutputHandler;
use crawlera_fetch::{FetchConfig, FetchMiddleware, Request, Response, Result, Spider, StatsCollector};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

pub const FETCH_URL: &str = "https://fetch.example/v2";
pub const APIKEY: &str = "12345";

pub fn config() -> FetchConfig {
    FetchConfig::new(APIKEY).with_url(FETCH_URL)
}

pub fn middleware() -> FetchMiddleware {
    FetchMiddleware::new(config(), StatsCollector::new())
}

pub fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// The proxy's reply to `wrapped`, as the downloader would hand it over.
pub fn proxy_response(wrapped: &Request, status: u16, body: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("content-encoding", HeaderValue::from_static("gzip"));
    headers.insert("date", HeaderValue::from_static("Fri, 24 Apr 2020 18:06:42 GMT"));
    Response::new(FETCH_URL, status)
        .with_headers(headers)
        .with_body(body)
        .with_request(wrapped.clone())
}

pub fn with_error_header(mut response: Response, code: &'static str) -> Response {
    response
        .headers
        .insert("x-crawlera-error", HeaderValue::from_static(code));
    response
}

pub const ENVELOPE_OK: &str =
    r#"{"url":"https://example.org","original_status":123,"headers":{"fake-header":"true"},"body":"foobar"}"#;
pub const ENVELOPE_BAD_JSON: &str = r#"{"Bad": "JSON"#;
pub const ENVELOPE_SERVER_ERROR: &str = r#"{"url":"https://example.org","original_status":503,"headers":{},"crawlera_status":"fail","crawlera_error":"serverbusy","body_encoding":"plain","body":"Server busy: too many outstanding requests"}"#;

/// Spider with switchable fetch override and one named predicate.
pub struct TestSpider {
    pub fetch_enabled: Option<bool>,
}

impl TestSpider {
    pub fn new() -> Self {
        Self { fetch_enabled: None }
    }

    pub fn with_fetch_enabled(enabled: bool) -> Self {
        Self { fetch_enabled: Some(enabled) }
    }
}

#[async_trait]
impl Spider for TestSpider {
    fn name(&self) -> String {
        "foo".to_string()
    }

    fn start_requests(&self) -> Vec<Request> {
        Vec::new()
    }

    fn fetch_enabled(&self) -> Option<bool> {
        self.fetch_enabled
    }

    fn retry_predicate(&self, name: &str) -> Option<ShouldRetry> {
        let always: ShouldRetry = Arc::new(|_: &Response, _: &Request| true);
        (name == "should_retry").then_some(always)
    }

    async fn parse(&self, _response: Response) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn process(&self, _item: Value) -> Result<()> {
        Ok(())
    }
}

/// Keeps written items in memory so tests can inspect them.
#[derive(Clone, Default)]
pub struct CollectingOutput {
    pub items: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl OutputHandler for CollectingOutput {
    async fn write(&mut self, item: Value) -> Result<()> {
        self.items.lock().unwrap().push(item);
        Ok(())
    }
}
