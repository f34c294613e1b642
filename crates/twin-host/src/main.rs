//! Host binary for the factory digital twin.
//!
//! Wires the engine session, the message bridge, the backend polling loop
//! and the detail overlay behind the gateway, then serves until Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `twin-config.yaml`
//! 3. Build the backend client and artifact fetcher
//! 4. Wire layout, registry, bridge, loader and correlator
//! 5. Start the notification pump feeding the overlay
//! 6. Start polling the default context (when `sync.autostart`)
//! 7. Serve the gateway until Ctrl-C
//! 8. Stop polling and tear the engine down

mod error;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use twin_backend::{HttpArtifactFetcher, HttpBackend};
use twin_core::config::{ConfigError, TwinConfig};
use twin_gateway::{AppState, Backends};

use crate::error::HostError;

const CONFIG_PATH: &str = "twin-config.yaml";

/// Application entry point for the host.
///
/// # Errors
///
/// Returns an error if any initialization step or the gateway fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("twin-host starting");

    // 2. Load configuration.
    let config = load_config(Path::new(CONFIG_PATH), |key| std::env::var(key).ok())?;
    info!(
        backend = config.backend.base_url,
        artifacts = config.engine.artifact_base_url,
        context = config.sync.context_key,
        sync_interval_ms = config.sync.interval_ms,
        "Configuration loaded"
    );

    // 3. Backend seams.
    let backend = Arc::new(HttpBackend::new(&config.backend).map_err(HostError::from)?);
    let fetcher = HttpArtifactFetcher::new(&config.engine).map_err(HostError::from)?;
    let backends = Backends {
        fetcher: Arc::new(fetcher),
        snapshots: Arc::clone(&backend) as _,
        details: backend,
    };

    // 4. Core components.
    let state = Arc::new(AppState::new(&config, backends));
    info!(
        surface = %state.defaults.surface,
        artifacts = state.loader.manifest().len(),
        "Engine session wired"
    );

    // 5. Notification pump.
    let pump = state.attach_overlay();

    // 6. Polling.
    if config.sync.autostart {
        state.sync.start_with(&config.sync).map_err(HostError::from)?;
    } else {
        info!("sync autostart disabled, waiting for /api/sync/start");
    }

    // 7. Serve until Ctrl-C.
    let served =
        twin_gateway::start_server(&config.gateway, Arc::clone(&state), shutdown_signal()).await;

    // 8. Teardown runs whether or not the server failed.
    state.sync.stop();
    state.registry.clear().await;
    pump.abort();

    served.map_err(HostError::from)?;
    info!("twin-host shutdown complete");
    Ok(())
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist. Environment overrides apply either way.
fn load_config(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<TwinConfig, HostError> {
    if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::from)?;
        Ok(TwinConfig::parse_with(&contents, lookup)?)
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        let mut config = TwinConfig::default();
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }
}

/// Resolve on Ctrl-C.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => warn!(error = %e, "failed to listen for Ctrl-C, shutting down"),
    }
}
