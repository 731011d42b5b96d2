pub mod config;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod logformatter;
pub mod metrics;
pub mod middleware;
pub mod output;
pub mod request;
pub mod response;
pub mod spider;

pub use crawler::{CrawlerEngine, CrawlerState};
pub use downloader::{Downloader, HttpDownloader};
pub use error::{Error, FetchError, Result};
pub use logformatter::{DefaultLogFormatter, FetchLogFormatter, LogFormatter};
pub use metrics::{StatsCollector, StatsSnapshot};
pub use middleware::{DownloaderMiddleware, FetchConfig, FetchMiddleware, ResponseAction};
pub use request::{FetchContext, Request};
pub use response::Response;
pub use spider::{GenericSpider, Spider};
