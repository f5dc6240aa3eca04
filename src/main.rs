//! Sluice - Entry Point
//!
//! Runs one extraction (or a pool inspection) and prints JSON on stdout.
//! Logs go to stderr.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice::config::LogConfig;
use sluice::proxy::{ProbeConfig, ProxyProbe};
use sluice::{Config, ExtractionRequest, StrategyOrchestrator, Verdict};

/// Exit code for an extraction that produced no transcript
const EXTRACTION_FAILED: u8 = 2;

/// Exit code for a malformed request (sysexits EX_USAGE)
const USAGE_ERROR: u8 = 64;

/// Resilient transcript extraction behind rotating proxies
#[derive(Parser)]
#[command(name = "sluice", version)]
#[command(about = "Resilient transcript extraction behind rotating proxies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a transcript and print the result as JSON
    Extract {
        /// Content URL or opaque identifier
        url: String,
        /// Strategies to run, in order (default: direct,proxied,audio)
        #[arg(short, long, value_delimiter = ',')]
        strategies: Vec<String>,
        /// Per-strategy timeout override, e.g. proxied=8000
        #[arg(long = "timeout-ms", value_parser = parse_override::<u64>)]
        timeout_ms: Vec<(String, u64)>,
        /// Per-strategy retry budget override, e.g. proxied=3
        #[arg(long, value_parser = parse_override::<u32>)]
        retries: Vec<(String, u32)>,
    },
    /// Print proxy pool statistics
    Stats,
    /// Check TCP reachability of every pooled proxy
    Probe {
        /// Connect timeout per proxy in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
        /// Proxies checked at once
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&LogConfig::from_env());

    let config = Config::from_env().context("invalid configuration")?;
    let pool = Arc::new(config.build_pool());
    info!(
        proxies = pool.len(),
        premium = config.proxy.premium.len(),
        free = config.proxy.free.len(),
        "Proxy pool ready"
    );

    match cli.command {
        Commands::Extract {
            url,
            strategies,
            timeout_ms,
            retries,
        } => {
            let orchestrator = StrategyOrchestrator::from_config(&config, pool)?;

            let mut builder = ExtractionRequest::builder(url, &config.default_chain());
            if !strategies.is_empty() {
                builder = builder.strategies(strategies);
            }
            for (name, ms) in timeout_ms {
                builder = builder.timeout(name, Duration::from_millis(ms));
            }
            for (name, n) in retries {
                builder = builder.max_retries(name, n);
            }
            let request = match builder.build() {
                Ok(request) => request,
                Err(e) if e.is_request_error() => {
                    error!("{}", e);
                    return Ok(ExitCode::from(USAGE_ERROR));
                }
                Err(e) => return Err(e.into()),
            };

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("Shutdown signal received, cancelling extraction");
                on_signal.cancel();
            });

            let result = orchestrator.extract(&request, &cancel).await;
            println!("{}", serde_json::to_string_pretty(&result)?);

            match result.verdict() {
                Verdict::Transcript(_) => Ok(ExitCode::SUCCESS),
                verdict => {
                    warn!("{}", verdict.message());
                    Ok(ExitCode::from(EXTRACTION_FAILED))
                }
            }
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&pool.stats())?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Probe {
            timeout_ms,
            concurrency,
        } => {
            let probe = ProxyProbe::new(ProbeConfig {
                timeout: Duration::from_millis(timeout_ms),
                concurrency,
            });
            let reports = probe.check_all(&pool).await;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("sluice={}", log.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if log.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// `NAME=VALUE` pairs for per-strategy overrides
fn parse_override<T: std::str::FromStr>(raw: &str) -> Result<(String, T), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected STRATEGY=VALUE, got {}", raw))?;
    let value = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid value for {}: {}", name, value))?;
    Ok((name.trim().to_string(), value))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
