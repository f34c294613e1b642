//! Shared application state for the gateway.
//!
//! [`AppState`] owns one of each core component, wired together the same
//! way for the binary and for tests; only the backend seams differ.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use twin_core::bridge::MessageBridge;
use twin_core::config::TwinConfig;
use twin_core::engine::ArtifactFetcher;
use twin_core::loader::EngineLoader;
use twin_core::registry::SessionRegistry;
use twin_core::sources::{DetailSource, SnapshotSource};
use twin_core::surface::{Layout, SharedLayout};
use twin_core::sync::SyncLoop;
use twin_overlay::{Fallback, OverlayCorrelator};
use twin_types::{ContainerId, ContextKey};

use crate::engine::{EngineLink, SocketEngineFactory};

/// External data sources the components are built on.
#[derive(Clone)]
pub struct Backends {
    /// Fetches runtime artifacts.
    pub fetcher: Arc<dyn ArtifactFetcher>,
    /// Live snapshots for the sync loop.
    pub snapshots: Arc<dyn SnapshotSource>,
    /// Detail records for the overlay.
    pub details: Arc<dyn DetailSource>,
}

/// Values used when a request leaves them out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    /// Container the display surface is mounted into.
    pub surface: ContainerId,
    /// Context polled when none is active.
    pub context: ContextKey,
    /// Poll interval.
    pub sync_interval: Duration,
}

/// Shared state passed to all Axum handlers via [`axum::extract::State`].
#[derive(Clone)]
pub struct AppState {
    /// Page layout: container id to bounds.
    pub layout: Arc<SharedLayout>,
    /// The process-wide engine session.
    pub registry: Arc<SessionRegistry>,
    /// Host/engine message bridge.
    pub bridge: Arc<MessageBridge>,
    /// Singleflight engine loader.
    pub loader: EngineLoader,
    /// Backend polling loop.
    pub sync: Arc<SyncLoop>,
    /// Hover and detail overlay state.
    pub correlator: OverlayCorrelator,
    /// Connection to the page's engine sockets.
    pub link: EngineLink,
    /// Fallback request values.
    pub defaults: Defaults,
}

impl AppState {
    /// Wire every component from `config` on top of `backends`.
    pub fn new(config: &TwinConfig, backends: Backends) -> Self {
        let layout = Arc::new(SharedLayout::new());
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&layout) as Arc<dyn Layout>));
        let bridge = Arc::new(MessageBridge::new(
            Arc::clone(&registry),
            config.engine.target_object.as_str(),
        ));
        let link = EngineLink::new();
        let loader = EngineLoader::new(
            Arc::clone(&registry),
            Arc::clone(&bridge),
            backends.fetcher,
            Arc::new(SocketEngineFactory::new(link.clone())),
            config.engine.manifest(),
        );
        let sync = Arc::new(SyncLoop::new(
            backends.snapshots,
            Arc::clone(&bridge),
            Arc::clone(&registry),
        ));
        let correlator = OverlayCorrelator::new(
            backends.details,
            Arc::clone(&registry),
            Fallback::from_config(&config.overlay),
        );

        Self {
            layout,
            registry,
            bridge,
            loader,
            sync,
            correlator,
            link,
            defaults: Defaults {
                surface: ContainerId::new(config.engine.default_surface.as_str()),
                context: ContextKey::new(config.sync.context_key.as_str()),
                sync_interval: config.sync.interval(),
            },
        }
    }

    /// Start feeding engine notifications into the overlay correlator.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach_overlay(&self) -> JoinHandle<()> {
        self.correlator.attach(&self.bridge)
    }

    /// Surface to load into when a request names none.
    pub fn surface_or_default(&self, requested: Option<&str>) -> ContainerId {
        requested
            .filter(|s| !s.trim().is_empty())
            .map_or_else(|| self.defaults.surface.clone(), ContainerId::new)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .field("loader", &self.loader)
            .field("sync", &self.sync)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}
