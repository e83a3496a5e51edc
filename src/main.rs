//! Predictive Cache CLI
//!
//! Replays a JSON-lines access trace through a [`PredictiveCache`] and
//! reports the resulting metrics.
//!
//! # Trace format
//!
//! ```text
//! {"user": "agent-7", "key": "lead_1"}
//! {"user": "agent-7", "key": "lead_2"}
//! {"key": "dashboard"}
//! ```
//!
//! Every record is a `get` with a synthetic fetch on miss.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use predictive_cache::cache::{spawn_warmer, InMemoryL2Client, L2Client, PredictiveCache};
use predictive_cache::monitoring::{HealthCheck, PrometheusExporter};
use predictive_cache::{CacheConfig, Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Predictive multi-tier cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "CACHE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay an access trace and print the metrics snapshot
    Replay(ReplayArgs),
}

#[derive(ClapArgs, Debug)]
struct ReplayArgs {
    /// JSON-lines trace file
    #[arg(long)]
    trace: PathBuf,

    /// Backing file for the L0 region (overrides the config file)
    #[arg(long, env = "CACHE_L0_PATH")]
    l0_path: Option<PathBuf>,

    /// L0 capacity in bytes (overrides the config file)
    #[arg(long, env = "CACHE_L0_CAPACITY")]
    l0_capacity: Option<usize>,

    /// L1 capacity in entries (overrides the config file)
    #[arg(long, env = "CACHE_L1_ENTRIES")]
    l1_entries: Option<usize>,

    /// Use an in-process L2 tier
    #[arg(long)]
    with_l2: bool,

    /// Warm each user's predictions after every access
    #[arg(long)]
    warm: bool,

    /// Simulated latency of the synthetic fetch in milliseconds
    #[arg(long, default_value = "0")]
    fetch_delay_ms: u64,

    /// Serve /metrics and /healthz on this address
    #[arg(long, env = "METRICS_ADDR")]
    http_addr: Option<String>,

    /// After the replay, keep serving and run the background warmer until Ctrl-C
    #[arg(long)]
    serve: bool,
}

/// One trace line
#[derive(Debug, Deserialize)]
struct TraceRecord {
    #[serde(default)]
    user: Option<String>,
    key: String,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)?,
        None => CacheConfig::default(),
    };

    match args.command {
        Command::Replay(replay) => {
            apply_overrides(&mut config, &replay);
            run_replay(config, replay).await
        }
    }
}

fn apply_overrides(config: &mut CacheConfig, args: &ReplayArgs) {
    if let Some(path) = &args.l0_path {
        config.l0_path = path.clone();
    }
    if let Some(capacity) = args.l0_capacity {
        config.l0_capacity_bytes = capacity;
    }
    if let Some(entries) = args.l1_entries {
        config.l1_max_entries = entries;
    }
}

async fn run_replay(config: CacheConfig, args: ReplayArgs) -> Result<()> {
    info!("Starting trace replay");
    info!("  Trace: {}", args.trace.display());
    info!("  L0: {} ({} bytes)", config.l0_path.display(), config.l0_capacity_bytes);
    info!("  L1 entries: {}", config.l1_max_entries);
    info!("  L2 enabled: {}", args.with_l2);
    info!("  Inline warming: {}", args.warm);

    let l2: Option<Arc<dyn L2Client>> = if args.with_l2 {
        Some(Arc::new(InMemoryL2Client::new()))
    } else {
        None
    };
    let cache: Arc<PredictiveCache<String>> = Arc::new(PredictiveCache::open(config, l2)?);
    let exporter = Arc::new(PrometheusExporter::new()?);
    let started = Instant::now();

    if let Some(addr) = args.http_addr.clone() {
        let state = ServerState {
            cache: Arc::clone(&cache),
            exporter: Arc::clone(&exporter),
            health: HealthCheck::default(),
        };
        tokio::spawn(async move {
            if let Err(e) = run_http_server(&addr, Arc::new(state)).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    let delay = Duration::from_millis(args.fetch_delay_ms);
    let fetch = move |key: String| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok::<_, anyhow::Error>(format!("value:{}", key))
    };

    let file = tokio::fs::File::open(&args.trace).await?;
    let mut lines = BufReader::new(file).lines();
    let top_n = cache.config().warm_top_n;
    let mut line_no = 0usize;
    let mut replayed = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record: TraceRecord = serde_json::from_str(&line).map_err(|e| {
            Error::Config(format!("{}:{}: {}", args.trace.display(), line_no, e))
        })?;

        let user = record.user.as_deref();
        let key = record.key.clone();
        if let Err(e) = cache
            .get_or_fetch(&record.key, user, || fetch(key))
            .await
        {
            warn!(key = %record.key, error = %e, "Replay fetch failed");
        }

        if args.warm {
            if let Some(user) = user {
                cache.predict_and_warm(user, top_n, fetch).await;
            }
        }
        replayed += 1;
    }

    info!(replayed, elapsed = ?started.elapsed(), "Replay complete");

    if args.serve {
        let token = CancellationToken::new();
        let warmer = cache
            .config()
            .warming_enabled
            .then(|| spawn_warmer(Arc::clone(&cache), fetch, token.clone()));

        info!("Serving until Ctrl-C");
        tokio::signal::ctrl_c().await?;
        token.cancel();
        if let Some(handle) = warmer {
            if let Err(e) = handle.await {
                warn!("Warming task ended abnormally: {}", e);
            }
        }
    }

    let snapshot = cache.metrics();
    let rendered = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    println!("{}", rendered);

    cache.close()?;
    info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logs go to stderr so the snapshot on stdout stays machine-readable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Metrics & Health Server
// =============================================================================

struct ServerState {
    cache: Arc<PredictiveCache<String>>,
    exporter: Arc<PrometheusExporter>,
    health: HealthCheck,
}

async fn run_http_server(addr: &str, state: Arc<ServerState>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid HTTP server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind HTTP server: {}", e)))?;

    info!("HTTP server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("HTTP server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(route(&req, &state)) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("HTTP connection error: {}", e);
            }
        });
    }
}

fn route(
    req: &hyper::Request<hyper::body::Incoming>,
    state: &ServerState,
) -> hyper::Response<http_body_util::Full<bytes::Bytes>> {
    use hyper::StatusCode;

    match req.uri().path() {
        "/metrics" => {
            state.exporter.update(&state.cache.metrics());
            match state.exporter.render() {
                Ok(body) => respond(StatusCode::OK, state.exporter.content_type(), body),
                Err(e) => respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    e.to_string(),
                ),
            }
        }
        "/healthz" | "/readyz" => {
            let health = state
                .health
                .check_all(&state.cache.metrics(), state.cache.l0().is_open());
            let status = if health.status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            let body = serde_json::to_string(&health).unwrap_or_else(|e| e.to_string());
            respond(status, "application/json", body)
        }
        "/livez" => respond(StatusCode::OK, "text/plain", "ok".to_string()),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found".to_string()),
    }
}

fn respond(
    status: hyper::StatusCode,
    content_type: &'static str,
    body: String,
) -> hyper::Response<http_body_util::Full<bytes::Bytes>> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};

    let mut response = hyper::Response::new(http_body_util::Full::new(bytes::Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
