use crate::request::Request;
use crate::response::Response;
use log::Level;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Crawled,
    SpiderError,
    DownloadError,
}

/// A pipeline log event, rendered through `Display`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: Level,
    pub kind: LogKind,
    pub request: String,
    pub status: Option<u16>,
    pub referer: Option<String>,
    pub flags: Vec<String>,
    pub error: Option<String>,
}

impl LogEntry {
    pub fn log(&self) {
        log::log!(self.level, "{}", self);
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let referer = self.referer.as_deref().unwrap_or("None");
        match self.kind {
            LogKind::Crawled => {
                write!(f, "Crawled ({}) {}", self.status.unwrap_or(0), self.request)?;
                if !self.flags.is_empty() {
                    write!(f, " {:?}", self.flags)?;
                }
                write!(f, " (referer: {})", referer)
            }
            LogKind::SpiderError => {
                write!(f, "Spider error processing {} (referer: {})", self.request, referer)
            }
            LogKind::DownloadError => match &self.error {
                Some(error) => write!(f, "Error downloading {}: {}", self.request, error),
                None => write!(f, "Error downloading {}", self.request),
            },
        }
    }
}

pub trait LogFormatter: Send + Sync {
    fn crawled(&self, request: &Request, response: &Response) -> LogEntry {
        LogEntry {
            level: Level::Debug,
            kind: LogKind::Crawled,
            request: request.to_string(),
            status: Some(response.status),
            referer: request.referer().map(str::to_string),
            flags: Vec::new(),
            error: None,
        }
    }

    fn spider_error(&self, _error: &str, request: &Request, _response: &Response) -> LogEntry {
        LogEntry {
            level: Level::Error,
            kind: LogKind::SpiderError,
            request: request.to_string(),
            status: None,
            referer: request.referer().map(str::to_string),
            flags: Vec::new(),
            error: None,
        }
    }

    fn download_error(&self, request: &Request, errmsg: Option<&str>) -> LogEntry {
        LogEntry {
            level: Level::Error,
            kind: LogKind::DownloadError,
            request: request.to_string(),
            status: None,
            referer: None,
            flags: Vec::new(),
            error: errmsg.map(str::to_string),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLogFormatter;

impl LogFormatter for DefaultLogFormatter {}

/// Shows the page a wrapped request was for instead of the fetch API endpoint.
///
/// Logs read `Crawled (200) <GET https://example.org> (referer: None)` rather
/// than `Crawled (200) <POST http://fetch.crawlera.com:8010/fetch/v2/> ...`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchLogFormatter {
    inner: DefaultLogFormatter,
}

impl FetchLogFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_target_url(mut entry: LogEntry, request: &Request) -> LogEntry {
        if let Some(target) = target_from_body(&request.body) {
            entry.request = target;
        }
        entry
    }
}

impl LogFormatter for FetchLogFormatter {
    fn crawled(&self, request: &Request, response: &Response) -> LogEntry {
        Self::set_target_url(self.inner.crawled(request, response), request)
    }

    fn spider_error(&self, error: &str, request: &Request, response: &Response) -> LogEntry {
        Self::set_target_url(self.inner.spider_error(error, request, response), request)
    }

    fn download_error(&self, request: &Request, errmsg: Option<&str>) -> LogEntry {
        Self::set_target_url(self.inner.download_error(request, errmsg), request)
    }
}

fn target_from_body(body: &[u8]) -> Option<String> {
    let payload: Value = serde_json::from_slice(body).ok()?;
    let url = payload.get("url")?.as_str()?;
    let method = payload.get("method").and_then(Value::as_str).unwrap_or("GET");
    Some(format!("<{} {}>", method, url))
}
