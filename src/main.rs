use clap::{Parser, Subcommand};
use crawlera_fetch::config::ConfigLoader;
use crawlera_fetch::crawler::CrawlerEngine;
use crawlera_fetch::metrics::{StatsCollector, StatsSnapshot};
use crawlera_fetch::middleware::settings::DEFAULT_FETCH_URL;
use crawlera_fetch::middleware::{DownloaderMiddleware, FetchMiddleware};
use crawlera_fetch::{FetchLogFormatter, HttpDownloader, Spider};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "crawlera-fetch")]
#[command(version)]
#[command(about = "Crawl through the Crawlera Fetch API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a crawl from a config file
    Run {
        /// Path to the configuration file (JSON/YAML/TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Show progress bars (stderr)
        #[arg(short, long, default_value_t = true)]
        progress: bool,

        /// Download timeout in seconds
        #[arg(short, long, default_value_t = 180)]
        timeout: u64,
    },
    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info"); }
    }
    let cli = Cli::parse();
    let logger = env_logger::Builder::from_default_env().build();
    let multi = Arc::new(indicatif::MultiProgress::new());

    match cli.command {
        Commands::Run { config, progress, timeout } => {
            let level = logger.filter();
            if progress {
                indicatif_log_bridge::LogWrapper::new((*multi).clone(), logger).try_init()?;
            } else {
                log::set_boxed_logger(Box::new(logger))?;
            }
            log::set_max_level(level);

            log::info!("Loading config from {:?}", config);
            let config_data = ConfigLoader::load(&config)?;
            log::info!("Loaded spider: {}", config_data.name);

            let progress_multi = progress.then(|| multi.clone());
            let spider: Arc<dyn Spider> =
                Arc::new(ConfigLoader::create_spider(&config_data, progress_multi)?);

            let stats = StatsCollector::new();
            let mut middleware = FetchMiddleware::from_settings(
                config_data.fetch.clone(),
                config_data.retry.clone(),
                stats.clone(),
            );
            middleware.open(spider.as_ref());

            let engine = CrawlerEngine::new(
                Duration::from_millis(config_data.delay_ms),
                config_data.concurrency,
                Some(stats),
            )
            .with_slot_concurrency(config_data.slot_concurrency);

            let mut progress_bar: Option<ProgressBar> = None;
            let mut progress_task = None;
            if progress {
                let pb = multi.add(ProgressBar::new_spinner());
                pb.set_style(ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")?);

                let mut stats_rx = engine.watch_stats();
                let pb_clone = pb.clone();
                progress_bar = Some(pb);
                progress_task = Some(tokio::spawn(async move {
                    while stats_rx.changed().await.is_ok() {
                        let snapshot: StatsSnapshot = stats_rx.borrow().clone();
                        pb_clone.tick();
                        pb_clone.set_message(summary_line(&snapshot));
                    }
                }));
            }

            log::info!("Starting crawl...");
            engine
                .run(
                    spider,
                    Arc::new(middleware),
                    Arc::new(HttpDownloader::new(Duration::from_secs(timeout))?),
                    Arc::new(FetchLogFormatter::new()),
                )
                .await;

            if let Some(task) = progress_task {
                task.abort();
            }
            let final_stats = engine.get_stats();
            if let Some(pb) = progress_bar {
                pb.finish_with_message(format!("{} - Completed", summary_line(&final_stats)));
            }

            println!("\n✅ Crawl Completed:");
            println!("   Requests Wrapped: {}", final_stats.count("crawlera_fetch/request_count"));
            println!("   Responses: {}", final_stats.count("downloader/response_count"));
            println!("   Fetch Errors: {}", final_stats.count("crawlera_fetch/response_error"));
            println!("   Items Scraped: {}", final_stats.count("item_scraped_count"));
            if let Some(avg) = final_stats.value("crawlera_fetch/avg_latency") {
                println!("   Average Fetch Latency: {:.3}s", avg);
            }
            println!("   Total Time: {:.1}s", final_stats.elapsed_seconds);

            log::info!("Dumping stats:\n{}", serde_json::to_string_pretty(&final_stats.values)?);
        }
        Commands::Check { config } => {
            match ConfigLoader::load(&config) {
                Ok(cfg) => {
                    println!("✅ Config is valid:");
                    println!("   Name: {}", cfg.name);
                    println!("   Start URLs: {:?}", cfg.start_urls);
                    println!("   Fetch API enabled: {}", cfg.fetch.enabled);
                    println!(
                        "   Endpoint: {}",
                        cfg.fetch.url.as_deref().unwrap_or(DEFAULT_FETCH_URL)
                    );
                    println!("   On error: {:?}", cfg.fetch.effective_on_error());
                }
                Err(e) => {
                    eprintln!("❌ Config error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn summary_line(snapshot: &StatsSnapshot) -> String {
    format!(
        "Responses: {} | Items: {} | Errors: {} | RPS: {:.2}",
        snapshot.count("downloader/response_count"),
        snapshot.count("item_scraped_count"),
        snapshot.count("crawlera_fetch/response_error"),
        snapshot.requests_per_second()
    )
}
