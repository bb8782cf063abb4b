// # parkradard - ParkRadar Sync Daemon
//
// This daemon is a THIN integration layer: it reads configuration from
// environment variables, wires the TDX feed adapter to a store and the
// sync orchestrator, and runs syncs on a fixed interval until it
// receives SIGTERM or SIGINT. All sync, reconciliation, and retry
// logic lives in parkradar-core; the HTTP client lives in
// parkradar-feed-tdx.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Feed (TDX)
// - `PARKRADAR_TDX_CLIENT_ID`: TDX application client ID (required)
// - `PARKRADAR_TDX_CLIENT_SECRET`: TDX application client secret (required)
// - `PARKRADAR_TDX_AUTH_URL`: Token endpoint override (optional)
// - `PARKRADAR_TDX_BASE_URL`: API base URL override (optional)
//
// ### Cities
// - `PARKRADAR_CITIES`: Comma-separated city codes (e.g. Taipei,Taoyuan);
//   empty or unset syncs all supported cities
//
// ### Store
// - `PARKRADAR_STORE_TYPE`: Store backend (memory, file)
// - `PARKRADAR_STORE_PATH`: Path to the store file (for file store)
//
// ### Sync
// - `PARKRADAR_SYNC_INTERVAL_SECS`: Seconds between scheduled runs
// - `PARKRADAR_MAX_CONCURRENCY`: Maximum concurrent per-city tasks
// - `PARKRADAR_RUN_TIMEOUT_SECS`: Per-run deadline; 0 disables it
// - `PARKRADAR_TOUCH_UNCHANGED`: Whether unchanged records advance
//   updated_at (true/false)
//
// ### Logging
// - `PARKRADAR_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export PARKRADAR_TDX_CLIENT_ID=your_client_id
// export PARKRADAR_TDX_CLIENT_SECRET=your_client_secret
// export PARKRADAR_CITIES=Taipei,NewTaipei
// export PARKRADAR_STORE_TYPE=file
// export PARKRADAR_STORE_PATH=/var/lib/parkradar/store.json
//
// parkradard
// ```

use anyhow::Result;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use parkradar_core::model::City;
use parkradar_core::traits::{FeedSource, LotStore, SyncStateStore};
use parkradar_core::{
    Error, FileStore, MemoryStore, RunStatus, SyncConfig, SyncEvent, SyncOrchestrator,
};
use parkradar_feed_tdx::{TdxConfig, TdxFeedClient};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DaemonExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    tdx_client_id: String,
    tdx_client_secret: String,
    tdx_auth_url: Option<String>,
    tdx_base_url: Option<String>,
    cities: Vec<City>,
    store_type: String,
    store_path: Option<String>,
    sync_interval_secs: u64,
    max_concurrency: Option<usize>,
    run_timeout_secs: Option<u64>,
    touch_unchanged: Option<bool>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let cities = env::var("PARKRADAR_CITIES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<City>()
                    .map_err(|e| anyhow::anyhow!("PARKRADAR_CITIES: {}", e))
            })
            .collect::<Result<Vec<City>>>()?;

        Ok(Self {
            tdx_client_id: env::var("PARKRADAR_TDX_CLIENT_ID").map_err(|_| {
                anyhow::anyhow!(
                    "PARKRADAR_TDX_CLIENT_ID is required. \
                    Set it via: export PARKRADAR_TDX_CLIENT_ID=your_client_id"
                )
            })?,
            tdx_client_secret: env::var("PARKRADAR_TDX_CLIENT_SECRET").map_err(|_| {
                anyhow::anyhow!(
                    "PARKRADAR_TDX_CLIENT_SECRET is required. \
                    Set it via: export PARKRADAR_TDX_CLIENT_SECRET=your_client_secret"
                )
            })?,
            tdx_auth_url: env::var("PARKRADAR_TDX_AUTH_URL").ok(),
            tdx_base_url: env::var("PARKRADAR_TDX_BASE_URL").ok(),
            cities,
            store_type: env::var("PARKRADAR_STORE_TYPE").unwrap_or_else(|_| "memory".to_string()),
            store_path: env::var("PARKRADAR_STORE_PATH").ok(),
            sync_interval_secs: env::var("PARKRADAR_SYNC_INTERVAL_SECS")
                .ok()
                .map(|s| s.parse().unwrap_or(300))
                .unwrap_or(300),
            max_concurrency: env::var("PARKRADAR_MAX_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok()),
            run_timeout_secs: env::var("PARKRADAR_RUN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
            touch_unchanged: env::var("PARKRADAR_TOUCH_UNCHANGED")
                .ok()
                .and_then(|s| s.parse().ok()),
            log_level: env::var("PARKRADAR_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.tdx_client_id.is_empty() {
            anyhow::bail!("PARKRADAR_TDX_CLIENT_ID cannot be empty");
        }
        if self.tdx_client_secret.is_empty() {
            anyhow::bail!("PARKRADAR_TDX_CLIENT_SECRET cannot be empty");
        }

        // Check for obvious placeholder credentials (common mistake)
        let secret_lower = self.tdx_client_secret.to_lowercase();
        if secret_lower.contains("your_client_secret")
            || secret_lower.contains("replace_me")
            || secret_lower.contains("example")
        {
            anyhow::bail!(
                "PARKRADAR_TDX_CLIENT_SECRET appears to be a placeholder. \
                Use actual credentials from the TDX portal."
            );
        }

        // Validate store type
        match self.store_type.as_str() {
            "memory" => {}
            "file" => {
                let path = self.store_path.as_deref().unwrap_or("");
                if path.is_empty() {
                    anyhow::bail!(
                        "PARKRADAR_STORE_PATH is required when PARKRADAR_STORE_TYPE=file. \
                        Set it via: export PARKRADAR_STORE_PATH=/var/lib/parkradar/store.json"
                    );
                }
                if let Some(parent) = std::path::Path::new(path).parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    anyhow::bail!(
                        "PARKRADAR_STORE_PATH parent directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                        parent.display(),
                        parent.display()
                    );
                }
            }
            other => anyhow::bail!(
                "PARKRADAR_STORE_TYPE '{}' is not supported. \
                Supported types: memory, file",
                other
            ),
        }

        // Validate numeric ranges
        if !(30..=86_400).contains(&self.sync_interval_secs) {
            anyhow::bail!(
                "PARKRADAR_SYNC_INTERVAL_SECS must be between 30 and 86400 seconds. Got: {}",
                self.sync_interval_secs
            );
        }

        if let Some(max_concurrency) = self.max_concurrency
            && (max_concurrency == 0 || max_concurrency > 32)
        {
            anyhow::bail!(
                "PARKRADAR_MAX_CONCURRENCY must be between 1 and 32. Got: {}",
                max_concurrency
            );
        }

        // Validate log level
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "PARKRADAR_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Build the orchestrator configuration from the overrides present
    fn sync_config(&self) -> SyncConfig {
        let mut sync = SyncConfig::default();
        if let Some(max_concurrency) = self.max_concurrency {
            sync.max_concurrency = max_concurrency;
        }
        if let Some(run_timeout_secs) = self.run_timeout_secs {
            sync.run_timeout_secs = run_timeout_secs;
        }
        if let Some(touch_unchanged) = self.touch_unchanged {
            sync.touch_unchanged = touch_unchanged;
        }
        sync
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    info!("Starting parkradard daemon");
    if config.cities.is_empty() {
        info!("Syncing all supported cities");
    } else {
        info!("Syncing {} configured city/cities", config.cities.len());
    }

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DaemonExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {}", e);
            DaemonExitCode::RuntimeError
        } else {
            DaemonExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let sync_config = config.sync_config();

    // Build the TDX feed client
    let mut tdx = TdxConfig::new(&config.tdx_client_id, &config.tdx_client_secret);
    if let Some(ref auth_url) = config.tdx_auth_url {
        tdx.auth_url = auth_url.clone();
    }
    if let Some(ref base_url) = config.tdx_base_url {
        tdx.base_url = base_url.clone();
    }
    let feed: Arc<dyn FeedSource> = Arc::new(TdxFeedClient::new(tdx, sync_config.retry.policy())?);

    // Build the store; one backend serves both lot rows and run history
    let (lots, runs): (Arc<dyn LotStore>, Arc<dyn SyncStateStore>) =
        match config.store_type.as_str() {
            "file" => {
                let path = config.store_path.as_deref().unwrap_or_default();
                info!("Using file store at {}", path);
                let store = FileStore::new(path).await?;
                (Arc::new(store.clone()), Arc::new(store))
            }
            _ => {
                info!("Using in-memory store (state is not persistent)");
                let store = MemoryStore::new();
                (Arc::new(store.clone()), Arc::new(store))
            }
        };

    let (orchestrator, events) = SyncOrchestrator::new(feed, lots, runs, sync_config)?;

    // Surface orchestrator events in the log
    let event_task = tokio::spawn(log_events(events));

    info!(
        "Scheduling a sync every {} second(s)",
        config.sync_interval_secs
    );

    let cities = (!config.cities.is_empty()).then(|| config.cities.clone());
    let mut interval = tokio::time::interval(Duration::from_secs(config.sync_interval_secs));
    // First tick fires immediately; a missed tick is skipped, not replayed
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let shutdown_signal = loop {
        tokio::select! {
            _ = interval.tick() => {
                match orchestrator.trigger_sync(cities.clone()).await {
                    Ok(run) => match run.status {
                        RunStatus::Succeeded => {
                            info!(run_id = %run.run_id, "Scheduled sync succeeded");
                        }
                        status => {
                            warn!(run_id = %run.run_id, %status, "Scheduled sync finished with failures");
                        }
                    },
                    Err(Error::SyncAlreadyInProgress(busy)) => {
                        warn!("Skipping scheduled sync, already in progress: {}", busy);
                    }
                    Err(e) => {
                        error!("Scheduled sync failed: {}", e);
                    }
                }
            }
            signal = &mut shutdown => {
                break signal?;
            }
        }
    };

    info!("Received shutdown signal: {}", shutdown_signal);
    info!("Shutting down daemon");
    event_task.abort();

    Ok(())
}

/// Log sync events as they arrive
async fn log_events(mut events: tokio::sync::mpsc::Receiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::RunStarted { run_id, cities } => {
                info!(%run_id, cities, "Sync run started");
            }
            SyncEvent::CityCompleted {
                run_id,
                city,
                created,
                updated,
                unchanged,
            } => {
                info!(%run_id, %city, created, updated, unchanged, "City reconciled");
            }
            SyncEvent::CityFailed {
                run_id,
                city,
                error,
            } => {
                warn!(%run_id, %city, error, "City failed");
            }
            SyncEvent::RunFinished { run_id, status } => {
                info!(%run_id, %status, "Sync run finished");
            }
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
