use crate::error::Result;
use crate::request::Request;
use crate::response::Response;
use crate::spider::Spider;

pub mod fetch;
pub mod retry;
pub mod settings;

pub use fetch::FetchMiddleware;
pub use settings::{FetchConfig, ShouldRetry};

/// What the response hook hands back to the engine.
#[derive(Debug)]
pub enum ResponseAction {
    Response(Response),
    /// Schedule this request instead of delivering a response.
    Retry(Request),
}

/// Hooks the engine calls around every download.
pub trait DownloaderMiddleware: Send + Sync {
    fn open(&mut self, _spider: &dyn Spider) {}

    /// Returns a replacement request, or `None` to send `request` as is.
    fn process_request(&self, request: &Request) -> Option<Request>;

    fn process_response(&self, request: &mut Request, response: Response) -> Result<ResponseAction>;

    fn close(&self) {}
}
