//! sitrep-wizard - Inspection Session Engine service
//!
//! Serves the wizard session to a local UI over HTTP + SSE and persists the
//! inspection to the remote backing store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sitrep_common::config::{
    default_config_path, load_toml_config_or_default, RootFolderInitializer,
};
use sitrep_common::events::EventBus;
use sitrep_wizard::backend::http::HttpBackingStore;
use sitrep_wizard::backend::memory::MemoryBackingStore;
use sitrep_wizard::backend::BackingStore;
use sitrep_wizard::config::{CliOverrides, WizardConfig};
use sitrep_wizard::services::{DraftContinuity, EngineServices, SessionController};
use sitrep_wizard::AppState;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the autosave ticker checks the debounce timer
const AUTOSAVE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Command-line arguments for sitrep-wizard
#[derive(Parser, Debug)]
#[command(name = "sitrep-wizard")]
#[command(about = "Inspection wizard session engine")]
#[command(version)]
struct Args {
    /// Backing store base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Backing store API token
    #[arg(long)]
    token: Option<String>,

    /// Address for the local HTTP API
    #[arg(short, long)]
    listen: Option<String>,

    /// Folder for local state (draft slot database)
    #[arg(short, long)]
    root_folder: Option<String>,

    /// Keep inspections in memory instead of calling the backing store
    #[arg(long, env = "SITREP_OFFLINE")]
    offline: bool,

    /// TOML config file (defaults to <config dir>/sitrep/sitrep-wizard.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path("sitrep-wizard"));
    let toml_config = load_toml_config_or_default(config_path.as_deref());

    let default_filter = format!(
        "sitrep_wizard={level},sitrep_common={level},tower_http=info",
        level = toml_config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sitrep-wizard");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let cli = CliOverrides {
        api_base_url: args.api_url,
        auth_token: args.token,
        listen: args.listen,
        root_folder: args.root_folder,
    };
    let config = WizardConfig::resolve(&cli, &toml_config);

    let initializer = RootFolderInitializer::new(config.root_folder.clone());
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = sitrep_wizard::db::init_database(&db_path)
        .await
        .context("Failed to open local database")?;

    let backend: Arc<dyn BackingStore> = if args.offline {
        warn!("Offline mode: inspections are kept in memory only");
        Arc::new(MemoryBackingStore::new())
    } else {
        info!("Backing store: {}", config.api_base_url);
        Arc::new(
            HttpBackingStore::new(
                &config.api_base_url,
                config.auth_token.as_deref(),
                config.request_timeout,
            )
            .context("Failed to build backing store client")?,
        )
    };

    let event_bus = EventBus::new(100);
    let services = EngineServices::new(backend, DraftContinuity::new(db_pool), event_bus)
        .with_debounce(config.autosave_debounce)
        .with_entity_ttl(config.entity_cache_ttl);
    let controller = SessionController::new(services);
    let state = AppState::new(controller.clone());

    let shutdown = CancellationToken::new();
    let ticker = tokio::spawn(run_autosave_ticker(
        controller,
        state.clone(),
        shutdown.clone(),
    ));

    let app = sitrep_wizard::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen))?;
    info!("Listening on http://{}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = ticker.await {
        warn!("Autosave ticker ended abnormally: {}", e);
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Poll the debounce timer and run due autosaves until cancelled
async fn run_autosave_ticker(
    controller: SessionController,
    state: AppState,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(AUTOSAVE_POLL_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Autosave ticker stopping");
                break;
            }
            _ = interval.tick() => {
                let Some(handle) = controller.poll_autosave().await else {
                    continue;
                };
                let state = state.clone();
                tokio::spawn(async move {
                    match handle.await {
                        Ok(sitrep_wizard::services::SaveOutcome::Failed(e)) => {
                            state.record_error(e.to_string()).await;
                        }
                        Ok(outcome) => debug!(result = outcome.label(), "Autosave finished"),
                        Err(e) => error!("Autosave task failed: {}", e),
                    }
                });
            }
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
