//! `GraphGate` Server Binary
//!
//! Starts the gateway in front of the built-in echo engine.
//!
//! ## Usage
//!
//! ```bash
//! # Start server with default settings
//! cargo run --bin graphgate-server
//!
//! # Custom address, CSRF protection on
//! cargo run --bin graphgate-server -- --host 0.0.0.0 --port 8080 --csrf
//! ```
//!
//! With `--csrf` a demo session is issued at startup and its id and token
//! are logged, so a client can present them.

use std::env;
use std::sync::Arc;
use std::sync::OnceLock;

use anyhow::Context;
use clap::Parser;

use graphgate::config::LoggingConfig;
use graphgate::protocol::rest;
use graphgate::{Config, EchoEngine, Gateway, InMemorySessionStore, StoreCsrfValidator};

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

const DEMO_SESSION_ID: &str = "demo";

#[derive(Debug, Parser)]
#[command(name = "graphgate-server", version, about = "GraphQL gateway over HTTP and WebSocket")]
struct Args {
    /// Configuration file (default: config.toml, config.local.toml)
    #[arg(long)]
    config: Option<String>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Enable CSRF token validation
    #[arg(long)]
    csrf: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {path}"))?,
        None => Config::load().context("loading configuration")?,
    };

    init_tracing(&config.logging);

    if let Some(host) = args.host {
        config.http.host = host;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }
    if args.csrf {
        config.csrf.enabled = true;
    }

    let csrf_enabled = config.csrf.enabled;
    let mut gateway = Gateway::new(config, Arc::new(EchoEngine::default()))
        .context("initialising gateway")?;

    if csrf_enabled {
        let store = Arc::new(InMemorySessionStore::new());
        let token = store.issue(DEMO_SESSION_ID);
        tracing::info!(session_id = DEMO_SESSION_ID, csrf_token = %token, "demo_session_issued");
        gateway = gateway.with_csrf_validator(Arc::new(StoreCsrfValidator::new(store)));
    }

    rest::start_http_server(Arc::new(gateway))
        .await
        .context("http server")?;

    Ok(())
}

fn init_tracing(logging_config: &LoggingConfig) {
    // GRAPHGATE_LOG takes precedence over config.logging.level
    let level = env::var("GRAPHGATE_LOG")
        .ok()
        .unwrap_or_else(|| logging_config.level.clone());
    let json = logging_config.format == "json";

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = TRACE_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let base = || {
        tracing_subscriber::fmt()
            .with_env_filter(filter.clone())
            .with_ansi(false)
            .with_writer(non_blocking.clone())
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(base().json().finish())
    } else {
        Box::new(base().compact().finish())
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}
