use crate::error::Result;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crawlera-fetch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        log::debug!("Downloading {}", request);

        let res = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await?;

        let url = res.url().to_string();
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let body = res.bytes().await?.to_vec();

        Ok(Response::new(url, status)
            .with_headers(headers)
            .with_body(body)
            .with_request(request.clone()))
    }
}
