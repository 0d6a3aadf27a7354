//! Pad Replay Service Binary
//!
//! Serves cohesion, block and timeline analytics for collaborative pads,
//! keeping every known pad caught up with its revision store.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_*`: connection pool settings, see `PostgresConfig`
//! - `PAD_REPLAY_HOST`: bind address (default: 0.0.0.0)
//! - `PAD_REPLAY_PORT`: bind port (default: 8002)
//! - `PAD_REPLAY_LOG_FORMAT`: "json" or "pretty" (default: json)
//! - `PAD_REPLAY_DB_CONNECT_TIMEOUT_SECS`: store connect timeout (default: 30)
//! - `PAD_REPLAY_TRACK_ALL_PADS`: track every stored pad at startup
//!   instead of on first request (default: true)
//! - `FEED_POLL_INTERVAL_MS`: how often tracked pads are checked for new
//!   revisions (default: 5000)
//! - `COH_*`, `TIMELINE_UTC_OFFSET_MINUTES`: analytics policy
//! - `RUST_LOG`: log level filter
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://... cargo run --bin pad_replay_service --features service
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use pad_replay_kernel::service::{create_router, metrics_middleware, ServiceState};
use pad_replay_kernel::{AnalyticsPolicyV1, DocumentRegistry, LogMetrics, PostgresRevisionStore};

type Registry = DocumentRegistry<PostgresRevisionStore>;
type BoxError = Box<dyn std::error::Error>;

/// Process settings that are not part of the analytics policy.
#[derive(Debug, Clone)]
struct ServiceConfig {
    host: String,
    port: u16,
    pretty_logs: bool,
    db_connect_timeout: Duration,
    track_all_pads: bool,
}

impl ServiceConfig {
    fn from_env() -> Self {
        fn var<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }
        Self {
            host: std::env::var("PAD_REPLAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: var("PAD_REPLAY_PORT").unwrap_or(8002),
            pretty_logs: std::env::var("PAD_REPLAY_LOG_FORMAT").is_ok_and(|f| f == "pretty"),
            db_connect_timeout: Duration::from_secs(
                var("PAD_REPLAY_DB_CONNECT_TIMEOUT_SECS").unwrap_or(30),
            ),
            track_all_pads: var("PAD_REPLAY_TRACK_ALL_PADS").unwrap_or(true),
        }
    }

    fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

fn init_tracing(pretty: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "pad_replay_service=info,pad_replay_kernel=info,tower_http=info,sqlx=warn".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if pretty {
        registry
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .init();
    }
}

/// Pad named by an `/api/pads/:pad/...` path.
fn pad_of(path: &str) -> Option<&str> {
    path.strip_prefix("/api/pads/")?
        .split('/')
        .next()
        .filter(|pad| !pad.is_empty())
}

/// Access log line per request, tagged with the pad it targets.
async fn access_log_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let pad = pad_of(&path).unwrap_or("-").to_string();

    let span = info_span!("request", request_id = %request_id, pad = %pad);
    let response = next.run(request).instrument(span).await;

    info!(
        target: "pad_replay_service::access",
        request_id = %request_id,
        pad = %pad,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

async fn connect_store(config: &ServiceConfig) -> Result<PostgresRevisionStore, BoxError> {
    let started = Instant::now();
    let store = tokio::time::timeout(config.db_connect_timeout, PostgresRevisionStore::from_env())
        .await
        .map_err(|_| {
            tracing::error!(
                timeout_secs = config.db_connect_timeout.as_secs(),
                "revision store connect timed out"
            );
            "revision store connect timed out"
        })??;
    store.ensure_schema().await?;
    info!(
        latency_ms = started.elapsed().as_millis() as u64,
        "revision store connected"
    );
    Ok(store)
}

/// Build the registry, track pads per config and start head polling.
async fn start_registry(
    config: &ServiceConfig,
    store: PostgresRevisionStore,
    policy: AnalyticsPolicyV1,
) -> Result<Registry, BoxError> {
    let poll_interval = Duration::from_millis(policy.poll_interval_ms);
    let registry = DocumentRegistry::new(Arc::new(store), policy, Arc::new(LogMetrics));
    if config.track_all_pads {
        let tracked = registry.track_all().await?;
        info!(tracked, "tracking stored pads");
    }
    registry.spawn_poller(poll_interval);
    Ok(registry)
}

/// Resolves with the name of the signal that asked the service to stop.
async fn stop_requested() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            },
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = ServiceConfig::from_env();
    init_tracing(config.pretty_logs);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        build_sha = option_env!("BUILD_SHA").unwrap_or("dev"),
        "starting pad replay service"
    );

    let policy = AnalyticsPolicyV1::from_env();
    policy.validate()?;
    info!(
        policy_id = %policy.policy_id(),
        params_hash = %policy.params_hash(),
        stable_window_ms = policy.stable_window_ms,
        poll_interval_ms = policy.poll_interval_ms,
        track_all_pads = config.track_all_pads,
        "analytics policy loaded"
    );

    let store = connect_store(&config).await?;
    let registry = start_registry(&config, store, policy).await?;

    let app = create_router(ServiceState::new(registry.clone()))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(access_log_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "serving pad analytics");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let signal = stop_requested().await;
            info!(signal, "stopping pad replay service");
        })
        .await?;

    // Let running document passes finish before exiting.
    registry.shutdown().await;
    info!(pads = registry.pads().len(), "pad replay service stopped");
    Ok(())
}
