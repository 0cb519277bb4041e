//! CLI entry point for the imageloader tool.

use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use imageloader_core::{
    ByteCache, CacheConfig, CacheProbe, CoordinatorConfig, DecoderChain, DownloadCoordinator,
    HttpNetwork, HttpOptions, Image, LayeredCache, LoadError, Request, ResourceKey,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use app_config::FileConfig;
use cli::Args;

const DEFAULT_CONCURRENCY: u8 = 10;
const MIB: u64 = 1024 * 1024;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = app_config::load_config(args.config.as_deref())?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_log_level(&args, &file_config)));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();

    debug!(?args, ?file_config, "CLI arguments parsed");

    let input_text = if !args.urls.is_empty() {
        args.urls.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read URLs from stdin")?;
        buffer
    } else {
        info!("No input provided. Pipe URLs via stdin or pass as arguments.");
        info!("Example: echo 'https://example.com/cat.png' | imageloader");
        return Ok(ExitCode::SUCCESS);
    };

    let urls = parse_input_lines(&input_text);
    if urls.is_empty() {
        info!("No URLs found in input");
        return Ok(ExitCode::SUCCESS);
    }
    info!(urls = urls.len(), "imageloader starting");

    let coordinator = build_coordinator(&args, &file_config)?;
    let outcomes = load_all(&coordinator, &args, &file_config, &urls).await;

    let stats = coordinator.stats();
    info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        cache_hits = stats.cache_hits,
        network_requests = stats.network_requests,
        "Load complete"
    );

    let summary = Summary::new(outcomes);
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to encode summary")?
        );
    } else {
        for outcome in &summary.results {
            println!("{}", outcome.report_line());
        }
    }

    Ok(if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Priority: quiet flag > verbose flag > config verbosity > info.
/// `RUST_LOG` overrides all of these when set.
fn default_log_level(args: &Args, file_config: &FileConfig) -> &'static str {
    if args.quiet {
        return "error";
    }
    match args.verbose {
        0 => file_config
            .verbosity
            .map_or("info", app_config::VerbositySetting::filter_directive),
        1 => "debug",
        _ => "trace",
    }
}

/// One URL per line; blank lines and `#` comments are skipped.
fn parse_input_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn build_coordinator(args: &Args, file_config: &FileConfig) -> Result<DownloadCoordinator> {
    let mut options = HttpOptions::default();
    if let Some(secs) = file_config.connect_timeout_secs {
        options.connect_timeout = Duration::from_secs(secs);
    }
    let network = HttpNetwork::with_options(Handle::current(), options)
        .context("Failed to build HTTP client")?;

    let cache = if args.no_cache {
        None
    } else {
        open_cache(args, file_config)
    };

    let concurrency = args
        .concurrency
        .or(file_config.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);
    let config = CoordinatorConfig {
        concurrency_limit: Some(usize::from(concurrency)),
        cache_probe: CacheProbe::Background,
        ..CoordinatorConfig::default()
    };

    DownloadCoordinator::new(Arc::new(network), cache, DecoderChain::default(), config)
        .context("Failed to create coordinator")
}

fn open_cache(args: &Args, file_config: &FileConfig) -> Option<Arc<dyn ByteCache>> {
    let memory = file_config
        .memory_capacity_mb
        .and_then(|mb| usize::try_from(mb.saturating_mul(MIB)).ok());
    let disk = file_config.disk_capacity_mb.map(|mb| mb.saturating_mul(MIB));

    let directory = args.cache_dir.clone().or_else(|| file_config.cache_dir.clone());
    let config = match directory {
        Some(directory) => CacheConfig::new(directory, memory, disk),
        None => {
            let Some(default) = CacheConfig::in_user_cache_dir(None) else {
                warn!("No cache directory available (HOME unset); continuing without cache");
                return None;
            };
            CacheConfig::new(default.directory, memory, disk)
        }
    };

    match LayeredCache::open(&config) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(error) => {
            warn!(
                directory = %config.directory.display(),
                error = %error,
                "Failed to open cache; continuing without cache"
            );
            None
        }
    }
}

/// Subscribes every URL and waits for all deliveries.
async fn load_all(
    coordinator: &DownloadCoordinator,
    args: &Args,
    file_config: &FileConfig,
    urls: &[String],
) -> Vec<Outcome> {
    let timeout = Duration::from_secs(
        args.timeout
            .or(file_config.timeout_secs)
            .unwrap_or(imageloader_core::request::DEFAULT_TIMEOUT.as_secs()),
    );
    let mut outcomes: Vec<Option<Outcome>> = vec![None; urls.len()];
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<Image, LoadError>)>();

    let mut waiting = 0usize;
    for (index, url) in urls.iter().enumerate() {
        let key = match ResourceKey::parse_url(url) {
            Ok(key) => key,
            Err(error) => {
                warn!(url = %url, error = %error, "Skipping invalid URL");
                outcomes[index] = Some(Outcome::failed(url, error.to_string()));
                continue;
            }
        };
        let request = Request::new(key)
            .with_priority(args.priority)
            .with_cache_policy(args.cache_policy)
            .with_timeout(timeout);
        let tx = tx.clone();
        coordinator.prefetch(
            request,
            Box::new(move |result| {
                let _ = tx.send((index, result));
            }),
        );
        waiting += 1;
    }
    drop(tx);

    let progress = progress_bar(args, waiting);
    while waiting > 0 {
        let Some((index, result)) = rx.recv().await else {
            break;
        };
        waiting -= 1;
        let url = &urls[index];
        let outcome = match result {
            Ok(image) => Outcome::ok(url, &image),
            Err(error) => Outcome::failed(url, error.to_string()),
        };
        if let Some(progress) = &progress {
            progress.set_message(url.clone());
            progress.inc(1);
        }
        outcomes[index] = Some(outcome);
    }
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    outcomes
        .into_iter()
        .zip(urls)
        .map(|(outcome, url)| {
            outcome.unwrap_or_else(|| Outcome::failed(url, "no result delivered".to_string()))
        })
        .collect()
}

fn progress_bar(args: &Args, total: usize) -> Option<ProgressBar> {
    if !should_show_progress(io::stderr().is_terminal(), args.quiet, args.json) {
        return None;
    }
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    Some(bar)
}

fn should_show_progress(stderr_is_terminal: bool, quiet: bool, json: bool) -> bool {
    let dumb_terminal = std::env::var("TERM").is_ok_and(|value| value.eq_ignore_ascii_case("dumb"));
    stderr_is_terminal && !quiet && !json && !dumb_terminal
}

#[derive(Debug, Clone, Serialize)]
struct Outcome {
    url: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Outcome {
    fn ok(url: &str, image: &Image) -> Self {
        Self {
            url: url.to_string(),
            status: "ok",
            width: Some(image.width()),
            height: Some(image.height()),
            error: None,
        }
    }

    fn failed(url: &str, error: String) -> Self {
        Self {
            url: url.to_string(),
            status: "failed",
            width: None,
            height: None,
            error: Some(error),
        }
    }

    fn report_line(&self) -> String {
        match (&self.error, self.width, self.height) {
            (Some(error), _, _) => format!("failed {}: {error}", self.url),
            (None, Some(width), Some(height)) => format!("ok {} {width}x{height}", self.url),
            (None, _, _) => format!("ok {}", self.url),
        }
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    total: usize,
    succeeded: usize,
    failed: usize,
    results: Vec<Outcome>,
}

impl Summary {
    fn new(results: Vec<Outcome>) -> Self {
        let failed = results.iter().filter(|outcome| outcome.error.is_some()).count();
        Self {
            total: results.len(),
            succeeded: results.len() - failed,
            failed,
            results,
        }
    }
}
