//! swcache smoke harness
//!
//! Installs and activates the static asset cache against a running origin,
//! replays a list of requests through the host, and prints a JSON summary of
//! where each response came from.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use serde_json::json;
use swcache_core::{init_logging, LogConfig, LogFormat, WorkerConfig};
use swcache_net::Request;
use swcache_sw::{HostEvent, ServiceWorkerHost};
use tracing::{error, info, warn};

/// Parse command line arguments
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    origin: Option<String>,
    requests: Vec<String>,
    output: Option<PathBuf>,
    log_format: LogFormat,
    skip_install: bool,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        Self::from_args(std::env::args().skip(1))
    }

    fn from_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut args = args.into_iter();
        let mut parsed = Args::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    parsed.config = Some(args.next().context("--config needs a value")?.into());
                }
                "--origin" => parsed.origin = Some(args.next().context("--origin needs a value")?),
                "--request" => {
                    parsed.requests.push(args.next().context("--request needs a value")?);
                }
                "--output" => {
                    parsed.output = Some(args.next().context("--output needs a value")?.into());
                }
                "--log-format" => {
                    let value = args.next().context("--log-format needs a value")?;
                    parsed.log_format = value.parse()?;
                }
                "--skip-install" => parsed.skip_install = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other => bail!("unknown argument: {other}"),
            }
        }

        Ok(parsed)
    }
}

fn print_usage() {
    println!("Usage: swcache-smoke [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>       JSON worker configuration");
    println!("  --origin <URL>        Origin serving the assets");
    println!("  --request <PATH>      Request to replay after install (repeatable)");
    println!("  --output <FILE>       Write the JSON summary to a file");
    println!("  --log-format <FMT>    pretty, compact, or json");
    println!("  --skip-install        Replay requests against an uncontrolled host");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse()?;
    init_logging(LogConfig::default().with_format(args.log_format))?;

    let mut config = match args.config {
        Some(ref path) => WorkerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    config.apply_env();
    if let Some(origin) = args.origin.clone() {
        config.origin = origin;
    }

    let (host, mut events) = ServiceWorkerHost::from_config(&config)
        .await
        .context("building service worker host")?;
    info!(origin = %config.origin, cache = %config.cache_name, "Host ready");

    let started = Instant::now();
    let install = if args.skip_install {
        json!({ "skipped": true })
    } else {
        match host.start().await {
            Ok(worker_id) => json!({ "ok": true, "worker": worker_id.to_string() }),
            Err(err) => {
                error!(error = %err, "Install failed");
                json!({ "ok": false, "error": err.to_string() })
            }
        }
    };
    let install_ms = started.elapsed().as_secs_f64() * 1000.0;

    let origin = config.origin_url()?;
    let paths = if args.requests.is_empty() {
        config.assets.clone()
    } else {
        args.requests.clone()
    };

    let mut results = Vec::with_capacity(paths.len());
    let (mut hits, mut misses, mut failures) = (0usize, 0usize, 0usize);
    for path in &paths {
        let url = origin
            .join(path)
            .with_context(|| format!("resolving {path}"))?;
        let request = Request::get(url.clone());
        let cached = host.is_controlled().await && host.is_cached(&request).await;

        match host.fetch(request).await {
            Ok(response) => {
                if cached {
                    hits += 1;
                } else {
                    misses += 1;
                }
                results.push(json!({
                    "url": url.as_str(),
                    "source": if cached { "cache" } else { "network" },
                    "status": response.status.as_u16(),
                    "bytes": response.body.len(),
                }));
            }
            Err(err) => {
                failures += 1;
                warn!(url = %url, error = %err, "Request failed");
                results.push(json!({
                    "url": url.as_str(),
                    "source": "network",
                    "error": err.to_string(),
                }));
            }
        }
    }

    let mut lifecycle = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let HostEvent::StateChange { worker_id, new_state } = event {
            lifecycle.push(json!({ "worker": worker_id.to_string(), "state": new_state }));
        }
    }

    let summary = json!({
        "origin": config.origin,
        "cache": config.cache_name,
        "install": install,
        "install_ms": (install_ms * 100.0).round() / 100.0,
        "lifecycle": lifecycle,
        "hits": hits,
        "misses": misses,
        "failures": failures,
        "requests": results,
    });
    let rendered = serde_json::to_string_pretty(&summary)?;

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("writing summary to {}", path.display()))?;
            info!(path = %path.display(), "Summary written");
        }
        None => println!("{rendered}"),
    }

    Ok(())
}
