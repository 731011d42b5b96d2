use crate::response::Response;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{Map, Value};
use std::fmt;

/// An outbound page request as the spider sees it.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub priority: i32,
    pub dont_filter: bool,
    pub retry_times: u32,
    pub download_slot: Option<String>,
    pub fetch: Option<FetchContext>,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: Vec::new(),
            priority: 0,
            dont_filter: false,
            retry_times: 0,
            download_slot: None,
            fetch: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Extra fetch API arguments for this request only.
    pub fn with_fetch_args(mut self, args: Map<String, Value>) -> Self {
        self.fetch.get_or_insert_with(FetchContext::default).args = args;
        self
    }

    /// Sends this request straight to its target, bypassing the fetch API.
    pub fn skip_fetch(mut self) -> Self {
        self.fetch.get_or_insert_with(FetchContext::default).skip = true;
        self
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn referer(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::REFERER)
            .and_then(|v| v.to_str().ok())
    }

    /// Copy kept in the fetch context so the request can be rebuilt after the round trip.
    ///
    /// Only the caller-supplied parts of the context survive; a request rebuilt
    /// from a snapshot is wrapped again when it next goes out.
    pub fn snapshot(&self) -> Request {
        let mut copy = self.clone();
        copy.fetch = self.fetch.as_ref().map(|ctx| FetchContext {
            skip: ctx.skip,
            args: ctx.args.clone(),
            ..FetchContext::default()
        });
        copy
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.method, self.url)
    }
}

/// Request-scoped state threaded from the request hook to the response hook.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    pub skip: bool,
    pub args: Map<String, Value>,
    pub original_request: Option<Box<Request>>,
    pub timing: Option<Timing>,
    pub upstream_response: Option<UpstreamResponse>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timing {
    pub start_ts: f64,
    pub end_ts: Option<f64>,
    pub latency: Option<f64>,
}

/// The proxy's own reply, kept after the page response has been rebuilt.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Value,
}

impl UpstreamResponse {
    pub fn from_response(response: &Response, envelope: Value) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: envelope,
        }
    }
}
