//! wardend - The warden background service
//!
//! This is the main entry point for the warden service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Sway focus tracking and the full-screen overlay
//! - Directory-backed document store
//! - The supervised enforcement engine

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use warden_config::{load_config, EngineConfig};
use warden_core::{EngineDeps, Supervisor};
use warden_host_api::UsageEventLog;
use warden_host_linux::{LayerShellOverlay, SwayFocusMonitor};
use warden_remote::FileDocumentStore;
use warden_store::{SqliteStore, Store};
use warden_util::default_config_path;

/// wardend - Usage monitoring and restriction enforcement
#[derive(Parser, Debug)]
#[command(name = "wardend")]
#[command(about = "Usage monitoring and restriction enforcement", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/warden/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Device identifier, used when no configuration file exists
    #[arg(long, env = "WARDEN_DEVICE_ID")]
    device_id: Option<String>,

    /// Data directory override (or set WARDEN_DATA_DIR env var)
    #[arg(short, long, env = "WARDEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Document store directory override
    #[arg(long, env = "WARDEN_DOCUMENT_DIR")]
    document_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn resolve_config(args: &Args) -> Result<EngineConfig> {
    let mut config = if args.config.exists() {
        let config = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;
        info!(config_path = %args.config.display(), "Configuration loaded");
        config
    } else if let Some(device_id) = &args.device_id {
        info!(
            config_path = %args.config.display(),
            "No configuration file; using defaults"
        );
        EngineConfig::for_device(device_id.clone())
    } else {
        bail!(
            "No configuration at {:?} and no --device-id given",
            args.config
        );
    };

    if let Some(data_dir) = &args.data_dir {
        config.paths.data_dir = data_dir.clone();
    }
    if let Some(document_dir) = &args.document_dir {
        config.paths.document_dir = document_dir.clone();
    }
    Ok(config)
}

/// Main service state
struct Service {
    supervisor: Arc<Supervisor>,
    focus_log: UsageEventLog,
}

impl Service {
    fn new(config: EngineConfig) -> Result<Self> {
        let data_dir = &config.paths.data_dir;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("wardend.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );
        info!(db_path = %db_path.display(), "Store initialized");

        let documents = Arc::new(FileDocumentStore::new(
            &config.paths.document_dir,
            config.sync.poll_interval,
        ));
        info!(document_dir = %config.paths.document_dir.display(), "Document store initialized");

        let focus_log = UsageEventLog::new();
        let deps = EngineDeps {
            usage_source: Arc::new(focus_log.clone()),
            overlay_surface: Box::new(LayerShellOverlay::new()),
            policy_source: documents.clone(),
            usage_sink: documents,
            store,
        };
        let supervisor =
            Arc::new(Supervisor::new(config, deps).context("Failed to create supervisor")?);

        Ok(Self {
            supervisor,
            focus_log,
        })
    }

    /// Log every engine event; the binary has no UI of its own
    fn spawn_event_logger(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut events = self.supervisor.events().subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => match serde_json::to_string(&event.payload) {
                        Ok(json) => info!(event = %json, "Engine event"),
                        Err(e) => debug!(error = %e, "Unserializable event"),
                    },
                    Err(RecvError::Lagged(missed)) => warn!(missed, "Event logger lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn run(self) -> Result<()> {
        let cancel = CancellationToken::new();
        let focus = SwayFocusMonitor::new(self.focus_log.clone()).spawn(cancel.clone());
        let logger = self.spawn_event_logger(cancel.clone());

        // Set up signal handlers
        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        // Started at login, which is this host's boot-completed moment
        self.supervisor.on_boot_completed().await;
        info!("Service running");

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
            // Sent by sway on exit
            _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
        }

        info!("Shutting down wardend");
        self.supervisor.stop().await;

        cancel.cancel();
        for task in [focus, logger] {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        info!("Shutdown complete");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mock_time = warden_util::is_mock_time_active(),
        "wardend starting"
    );

    let config = resolve_config(&args)?;
    let service = Service::new(config)?;
    service.run().await
}
