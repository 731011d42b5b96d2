use crate::downloader::Downloader;
use crate::logformatter::LogFormatter;
use crate::metrics::{StatsCollector, StatsSnapshot};
use crate::middleware::{DownloaderMiddleware, ResponseAction};
use crate::request::Request;
use crate::spider::Spider;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlerState {
    Idle,
    Running,
    Stopped,
}

pub struct CrawlerEngine {
    delay: Duration,
    concurrency: usize,
    slot_concurrency: usize,
    stats: StatsCollector,
    state: Arc<Mutex<CrawlerState>>,
    state_watcher: watch::Sender<CrawlerState>,
}

/// Everything one request needs on its way through the hooks.
#[derive(Clone)]
struct Pipeline {
    spider: Arc<dyn Spider>,
    middleware: Arc<dyn DownloaderMiddleware>,
    downloader: Arc<dyn Downloader>,
    formatter: Arc<dyn LogFormatter>,
    stats: StatsCollector,
    delay: Duration,
}

impl Pipeline {
    /// Runs one outgoing request to completion and returns its slot along
    /// with any requests it spawned.
    async fn crawl(self, slot: String, request: Request) -> (String, Vec<Request>) {
        let follow_ups = self.handle(request).await;
        sleep(self.delay).await;
        (slot, follow_ups)
    }

    async fn handle(&self, mut request: Request) -> Vec<Request> {
        self.stats.inc_value("downloader/request_count");
        let response = match self.downloader.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.inc_value("downloader/exception_count");
                self.formatter.download_error(&request, Some(&e.to_string())).log();
                return Vec::new();
            }
        };
        self.stats.inc_value("downloader/response_count");
        self.stats.inc_value(format!(
            "downloader/response_status_count/{}",
            response.status
        ));

        let response = match self.middleware.process_response(&mut request, response) {
            Ok(ResponseAction::Response(response)) => response,
            Ok(ResponseAction::Retry(retry)) => return vec![retry],
            Err(e) => {
                self.stats.inc_value("downloader/exception_count");
                self.formatter.download_error(&request, Some(&e.to_string())).log();
                return Vec::new();
            }
        };
        self.formatter.crawled(&request, &response).log();

        match self.spider.parse(response.clone()).await {
            Ok(items) => {
                for item in items {
                    self.stats.inc_value("item_scraped_count");
                    if let Err(e) = self.spider.process(item).await {
                        log::error!("Error processing item: {}", e);
                        self.stats.inc_value("item_dropped_count");
                    }
                }
            }
            Err(e) => {
                self.stats.inc_value("spider_exceptions");
                self.formatter
                    .spider_error(&e.to_string(), &request, &response)
                    .log();
            }
        }
        Vec::new()
    }
}

/// The slot a request is throttled under: its assigned download slot, or its host.
fn slot_key(request: &Request) -> String {
    request.download_slot.clone().unwrap_or_else(|| {
        Url::parse(&request.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default()
    })
}

impl CrawlerEngine {
    pub fn new(delay: Duration, concurrency: usize, stats: Option<StatsCollector>) -> Self {
        let (state_tx, _) = watch::channel(CrawlerState::Idle);

        Self {
            delay,
            concurrency: concurrency.max(1),
            slot_concurrency: concurrency.max(1),
            stats: stats.unwrap_or_default(),
            state: Arc::new(Mutex::new(CrawlerState::Idle)),
            state_watcher: state_tx,
        }
    }

    /// Caps requests in flight per download slot.
    pub fn with_slot_concurrency(mut self, slot_concurrency: usize) -> Self {
        self.slot_concurrency = slot_concurrency.max(1);
        self
    }

    pub async fn run(
        &self,
        spider: Arc<dyn Spider>,
        middleware: Arc<dyn DownloaderMiddleware>,
        downloader: Arc<dyn Downloader>,
        formatter: Arc<dyn LogFormatter>,
    ) {
        self.set_state(CrawlerState::Running).await;

        let pipeline = Pipeline {
            spider: spider.clone(),
            middleware: middleware.clone(),
            downloader,
            formatter,
            stats: self.stats.clone(),
            delay: self.delay,
        };
        let concurrency = self.concurrency;
        let slot_concurrency = self.slot_concurrency;
        let stats = self.stats.clone();
        let start_requests = spider.start_requests();

        let crawl = async move {
            // Outgoing requests, already through the request hook.
            let mut queue: VecDeque<(String, Request)> = VecDeque::new();
            let mut seen = HashSet::new();
            let mut active: HashMap<String, usize> = HashMap::new();
            let mut in_flight = FuturesUnordered::new();

            let mut enqueue = |queue: &mut VecDeque<(String, Request)>, request: Request| {
                let fingerprint = format!("{} {} {}", request.method, request.url, request.body_text());
                if seen.insert(fingerprint) || request.dont_filter {
                    stats.inc_value("scheduler/enqueued");
                    let request = pipeline.middleware.process_request(&request).unwrap_or(request);
                    queue.push_back((slot_key(&request), request));
                } else {
                    log::debug!("Filtered duplicate request: {}", request);
                    stats.inc_value("dupefilter/filtered");
                }
            };

            for request in start_requests {
                enqueue(&mut queue, request);
            }

            loop {
                while in_flight.len() < concurrency {
                    let ready = queue.iter().position(|(slot, _)| {
                        active.get(slot).copied().unwrap_or(0) < slot_concurrency
                    });
                    let Some((slot, request)) = ready.and_then(|i| queue.remove(i)) else {
                        break;
                    };
                    *active.entry(slot.clone()).or_insert(0) += 1;
                    in_flight.push(pipeline.clone().crawl(slot, request));
                }
                match in_flight.next().await {
                    Some((slot, follow_ups)) => {
                        if let Some(count) = active.get_mut(&slot) {
                            *count = count.saturating_sub(1);
                        }
                        for request in follow_ups {
                            enqueue(&mut queue, request);
                        }
                    }
                    None => break,
                }
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down...");
            }
            _ = crawl => {
                log::info!("Crawl finished.");
            }
        }

        if let Err(e) = spider.close().await {
            log::error!("Error closing spider: {}", e);
        }
        middleware.close();
        self.set_state(CrawlerState::Stopped).await;
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn watch_stats(&self) -> watch::Receiver<StatsSnapshot> {
        let (tx, rx) = watch::channel(self.stats.snapshot());
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                if tx.send(stats.snapshot()).is_err() {
                    break;
                }
            }
        });
        rx
    }

    pub async fn state(&self) -> CrawlerState {
        *self.state.lock().await
    }

    pub async fn set_state(&self, state: CrawlerState) {
        let mut state_guard = self.state.lock().await;
        *state_guard = state;
        let _ = self.state_watcher.send(state);
    }
}
