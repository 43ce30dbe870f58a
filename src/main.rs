use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

mod config;
mod docs;
mod error;
mod handlers;
mod middleware;
mod ratelimit;
mod redis_client;
mod response;
mod server;
mod store;
mod telemetry;

use config::{Config, ConfigError, Environment};
use ratelimit::{RateLimitStore, RateLimits};
use store::{StoreError, UserStore};

/// In-flight requests get this long to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    pub config: Config,

    /// The `users` collection (Redis or in-memory).
    pub users: Arc<dyn UserStore>,

    /// General and strict rate-limit zones.
    pub limits: RateLimits,

    /// Process start, for `/health` uptime.
    pub started: Instant,
}

impl AppState {
    pub fn new(config: Config, users: Arc<dyn UserStore>, windows: Arc<dyn RateLimitStore>) -> Self {
        let limits = RateLimits::new(&config.rate_limit, windows);
        Self {
            config,
            users,
            limits,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Error)]
enum BootError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot connect to the database: {0}")]
    Database(#[source] StoreError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server exited with error: {0}")]
    Serve(#[source] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = config::load_dotenv();
    let config = Config::from_env();
    let environment = config
        .as_ref()
        .map(|c| c.environment)
        .unwrap_or(Environment::Development);
    telemetry::init(environment);

    if let Some(e) = dotenv {
        tracing::warn!(error = %e, "ignoring unreadable .env file");
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Result<Config, ConfigError>) -> Result<(), BootError> {
    let config = config?;

    // ── 1. Connect the store (fatal on failure) ──────────────────
    let backends = redis_client::connect(&config.database_url)
        .await
        .map_err(BootError::Database)?;

    tracing::info!(
        users = backends.users.backend(),
        rate_limits = backends.windows.store_type(),
        "backends ready"
    );

    // ── 2. Rebuild indexes if configured ─────────────────────────
    if config.auto_index {
        if let Err(e) = backends.users.sync_indexes().await {
            tracing::warn!(error = %e, "index sync failed; continuing with existing indexes");
        }
    }

    // ── 3. Build shared state and the pipeline ───────────────────
    let state = Arc::new(AppState::new(config, backends.users, backends.windows));
    let app = server::create_router(Arc::clone(&state));

    // ── 4. Bind & serve ──────────────────────────────────────────
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| BootError::Bind { addr, source })?;

    let port = state.config.port;
    tracing::info!(
        environment = %state.config.environment,
        store = state.users.backend(),
        docs = docs::DOCS_PATH,
        "server listening on http://localhost:{port}"
    );

    let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Listener closed and in-flight requests drained.
    tracing::info!("http server closed");
    state.users.close().await;
    served.map_err(BootError::Serve)
}

/// Resolves on SIGINT or SIGTERM and arms a watchdog that exits the process
/// if draining takes longer than [`SHUTDOWN_GRACE`].
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    };
    tracing::info!(signal, "shutdown signal received, draining connections");

    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        tracing::error!("could not close connections in time, forcefully shutting down");
        std::process::exit(1);
    });
}
