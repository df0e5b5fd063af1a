use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use profile_post_fetcher::config::Config;
use profile_post_fetcher::export::{default_filename, write_records};
use profile_post_fetcher::{Backend, FetchMethod, FetchOrchestrator, FetchRequest, FetchStatus};

/// Fetch a profile's posts and export them as JSON.
#[derive(Parser, Debug)]
#[command(name = "profile-post-fetcher")]
#[command(version)]
struct Args {
    /// Profile to fetch (required for the graphql backend)
    #[arg(short, long)]
    username: Option<String>,

    /// Backend to use: graphql or graph_api (defaults to FETCH_BACKEND)
    #[arg(short, long)]
    backend: Option<Backend>,

    /// Which posts to keep
    #[arg(short, long, value_enum, default_value_t = MethodArg::All)]
    method: MethodArg,

    /// Number of posts for --method recent
    #[arg(long, default_value = "10")]
    count: usize,

    /// Percentage of posts for --method top
    #[arg(long, default_value = "10")]
    percentage: u8,

    /// Range start for --method date-range (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_since)]
    since: Option<DateTime<Utc>>,

    /// Range end for --method date-range; a bare date means the end of that day
    #[arg(long, value_parser = parse_until)]
    until: Option<DateTime<Utc>>,

    /// Hard ceiling on returned posts (defaults to MAX_RESULTS)
    #[arg(long)]
    max_results: Option<usize>,

    /// Output file; `.jsonl` writes JSON Lines
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MethodArg {
    All,
    Recent,
    Top,
    DateRange,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize logging
    init_tracing()?;

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(max_results) = args.max_results {
        config.max_results = max_results;
    }
    config.validate().context("Invalid configuration")?;

    info!(backend = %config.backend, max_results = config.max_results, "Configuration loaded");

    if config.backend == Backend::GraphQl {
        match &config.login {
            Some(login) => info!(login = %login.username, "Login credentials configured"),
            None => warn!("No login configured - fetching public data anonymously"),
        }
    }

    let method = build_method(&args)?;
    let mut request = FetchRequest::new(config.backend, method).with_max_results(config.max_results);
    if let Some(username) = &args.username {
        request = request.with_username(username.trim());
    }

    let output = args.output.clone().unwrap_or_else(|| {
        default_filename(request.target_username.as_deref(), Utc::now())
    });

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing current page");
        signal_token.cancel();
    });

    let orchestrator = FetchOrchestrator::new(config);
    match orchestrator.run(&request, &cancel).await {
        Ok(report) => {
            if report.status == FetchStatus::Cancelled {
                warn!(records = report.records.len(), "Fetch cancelled, exporting partial results");
            }
            write_records(&output, &report.records)?;
            info!(
                records = report.records.len(),
                pages = report.pages_fetched,
                path = %output.display(),
                "Done"
            );
            Ok(())
        }
        Err(failure) => {
            if !failure.partial.is_empty() {
                write_records(&output, &failure.partial)
                    .context("Failed to export partial results")?;
                warn!(
                    records = failure.partial.len(),
                    path = %output.display(),
                    "Exported partial results"
                );
            }
            Err(failure.into())
        }
    }
}

fn build_method(args: &Args) -> Result<FetchMethod> {
    Ok(match args.method {
        MethodArg::All => FetchMethod::All,
        MethodArg::Recent => FetchMethod::Recent { count: args.count },
        MethodArg::Top => FetchMethod::Top {
            percentage: args.percentage,
        },
        MethodArg::DateRange => {
            let (Some(since), Some(until)) = (args.since, args.until) else {
                bail!("--method date-range requires both --since and --until");
            };
            FetchMethod::DateRange { since, until }
        }
    })
}

fn parse_since(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_bound(raw, (0, 0, 0, 0))
}

fn parse_until(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_bound(raw, (23, 59, 59, 999_999_999))
}

/// RFC 3339 timestamps are taken as-is; bare dates get the given time of day in UTC.
fn parse_bound(raw: &str, (h, m, s, nanos): (u32, u32, u32, u32)) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_nano_opt(h, m, s, nanos))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("expected YYYY-MM-DD or an RFC 3339 timestamp, got '{raw}'"))
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,profile_post_fetcher=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
