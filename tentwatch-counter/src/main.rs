//! tentwatch-counter - camera/RFID reconciliation and occupancy dashboards
//!
//! Startup order: configuration, logging, database, registry seed, evidence
//! store, reconcile scheduler, HTTP server. Shutdown on Ctrl+C or SIGTERM
//! stops the scheduler after the server drains.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tentwatch_common::config::{self, TomlConfig};
use tentwatch_common::db::{init_database, RegistryFile};
use tentwatch_common::SystemClock;
use tentwatch_counter::media::FsEvidenceStore;
use tentwatch_counter::reconcile::{ReconcileSchedule, ReconcileScheduler};
use tentwatch_counter::{build_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for tentwatch-counter
#[derive(Parser, Debug)]
#[command(name = "tentwatch-counter")]
#[command(about = "Tent occupancy and illegal-pilgrim reconciliation service")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "TENTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database and evidence images
    #[arg(short, long, env = "TENTWATCH_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "TENTWATCH_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(short, long, env = "TENTWATCH_BIND")]
    bind: Option<String>,

    /// Sites/devices registry to seed at startup (overrides config)
    #[arg(long, env = "TENTWATCH_REGISTRY")]
    registry: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config: TomlConfig =
        config::load_toml_config(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "tentwatch_counter={level},tentwatch_common={level},tower_http=info",
                    level = toml_config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Build identification first, before any slow startup step
    info!(
        "Starting tentwatch-counter v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let zone = toml_config.site_zone()?;
    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Cannot create root folder {}", root_folder.display()))?;
    info!(root_folder = %root_folder.display(), utc_offset = %zone.offset(), "Resolved paths");

    let db_path = config::database_path(&root_folder, &toml_config);
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    if let Some(registry) = args.registry.as_ref().or(toml_config.registry_file.as_ref()) {
        RegistryFile::load(registry)?
            .apply(&pool)
            .await
            .context("Failed to seed registry")?;
    }

    let media_root = config::media_root(&root_folder);
    std::fs::create_dir_all(&media_root)
        .with_context(|| format!("Cannot create media folder {}", media_root.display()))?;
    let store = Arc::new(FsEvidenceStore::new(&media_root, &toml_config.media_base_url));
    let clock = Arc::new(SystemClock);

    let state = AppState::new(pool, zone, clock.clone(), store, &toml_config.reconcile)
        .with_media_root(&media_root);

    let cancel = CancellationToken::new();
    let scheduler = Arc::new(
        ReconcileScheduler::new(state.reconciler.clone(), clock)
            .with_schedule(ReconcileSchedule::from_secs(&toml_config.reconcile.offsets_secs))
            .with_tick_interval(Duration::from_millis(toml_config.reconcile.tick_interval_ms)),
    );
    let scheduler_task = scheduler.spawn(cancel.clone());

    let app = build_router(state);

    let bind = args.bind.unwrap_or(toml_config.bind_address.clone());
    let port = args.port.unwrap_or(toml_config.port);
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("tentwatch-counter listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = scheduler_task.await {
        warn!(error = %e, "Reconcile scheduler ended abnormally");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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
