use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use girder::db::Database;
use girder::error::{ConfigError, GirderError};
use girder::pipeline::DispatcherSettings;
use girder::server::{router, AppState};
use girder::{load_config, resolve_secret_optional, Config, Result};

fn init_tracing() {
    // Bridge `log` macros (used in the db layer) into tracing.
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn database_path(config: &Config) -> Result<PathBuf> {
    match &config.database_path {
        Some(path) => Ok(PathBuf::from(path)),
        None => girder::db::default_database_path()
            .ok_or_else(|| GirderError::Config(ConfigError::NoDatabasePath)),
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "girder.json".to_string());
    info!("Loading configuration from {config_path}");
    let config = load_config(&config_path)?;

    let db = Database::open(&database_path(&config)?)?;

    let worker_token = resolve_secret_optional(
        config.worker_token.as_deref(),
        config.worker_token_file.as_deref(),
        config.worker_token_env_var.as_deref(),
    )?;
    if worker_token.is_none() {
        // Local worker stacks run without authentication; calls go out
        // with no credential rather than failing startup.
        tracing::warn!("no worker credential configured, dispatching unauthenticated");
    }

    let settings = DispatcherSettings {
        worker_base_url: config.worker_base_url.clone(),
        worker_token,
        batch_limit: config.batch_limit,
        dispatch_concurrency: config.dispatch_concurrency,
        worker_timeout: Duration::from_secs(config.worker_timeout_secs),
        claim_ttl_secs: config.claim_ttl_secs,
    };

    let state = AppState::new(db, settings)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_address)
        .await
        .map_err(GirderError::Server)?;
    info!("Pipeline API listening on http://{}", config.listen_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(GirderError::Server)?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting girder v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run().await {
        tracing::error!("Fatal: {e}");
        std::process::exit(1);
    }
}
