use crate::error::Result;
use crate::middleware::ShouldRetry;
use crate::output::OutputHandler;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait Spider: Send + Sync {
    fn name(&self) -> String;
    fn start_requests(&self) -> Vec<Request>;

    /// Spider-level switch for the fetch API; beats the `fetch.enabled` setting.
    fn fetch_enabled(&self) -> Option<bool> {
        None
    }

    /// Looks up a retry predicate by the name given in `fetch.should_retry`.
    fn retry_predicate(&self, _name: &str) -> Option<ShouldRetry> {
        None
    }

    async fn parse(&self, response: Response) -> Result<Vec<Value>>;
    async fn process(&self, item: Value) -> Result<()>;
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct GenericSpider {
    pub name: String,
    pub start_urls: Vec<String>,
    pub request_args: Map<String, Value>,
    pub output_handler: Arc<Mutex<Box<dyn OutputHandler>>>,
}

impl GenericSpider {
    pub fn new(
        name: String,
        start_urls: Vec<String>,
        request_args: Map<String, Value>,
        output_handler: Box<dyn OutputHandler>,
    ) -> Self {
        Self {
            name,
            start_urls,
            request_args,
            output_handler: Arc::new(Mutex::new(output_handler)),
        }
    }
}

#[async_trait]
impl Spider for GenericSpider {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn start_requests(&self) -> Vec<Request> {
        self.start_urls
            .iter()
            .map(|url| {
                let request = Request::new(url.clone());
                if self.request_args.is_empty() {
                    request
                } else {
                    request.with_fetch_args(self.request_args.clone())
                }
            })
            .collect()
    }

    fn retry_predicate(&self, name: &str) -> Option<ShouldRetry> {
        let predicate: ShouldRetry = match name {
            "server_error" => Arc::new(|response: &Response, _: &Request| response.status >= 500),
            "empty_body" => Arc::new(|response: &Response, _: &Request| response.body.is_empty()),
            _ => return None,
        };
        Some(predicate)
    }

    async fn parse(&self, response: Response) -> Result<Vec<Value>> {
        log::debug!("Body length: {} bytes", response.body.len());

        let content_type = response.header("content-type").map(str::to_string);
        Ok(vec![json!({
            "url": response.url,
            "status": response.status,
            "length": response.body.len(),
            "content_type": content_type,
        })])
    }

    async fn process(&self, item: Value) -> Result<()> {
        let mut handler = self.output_handler.lock().await;
        handler.write(item).await
    }

    async fn close(&self) -> Result<()> {
        let mut handler = self.output_handler.lock().await;
        handler.close().await
    }
}
