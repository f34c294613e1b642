//! Engine loader with single-flight deduplication.
//!
//! Creating the engine is expensive (tens of megabytes of artifacts plus a
//! runtime start-up), so at most one load runs at a time. Every caller that
//! arrives while a load is in flight awaits the same shared future and gets
//! the same [`EngineHandle`]. Once loaded, further requests only move the
//! display surface.
//!
//! # Load sequence
//!
//! 1. Verify the target container exists.
//! 2. Fetch every artifact in the manifest (progress 0-80%).
//! 3. Instantiate through the [`EngineFactory`] (progress up to 99%).
//! 4. Install the bridge's inbound port into the instance.
//! 5. Store handle and surface in the registry (progress 100%).
//! 6. Replay the active context command.
//!
//! The load runs on its own task, so it finishes even if every caller
//! stops waiting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};
use twin_types::{ContainerId, LoadState};

use crate::bridge::MessageBridge;
use crate::engine::{
    Artifact, ArtifactFetcher, ArtifactManifest, EngineFactory, EngineHandle, FetchedArtifact,
    LoadedArtifacts,
};
use crate::lock;
use crate::progress::{self, FETCH_SHARE, IN_FLIGHT_CEILING, ProgressSink};
use crate::registry::SessionRegistry;

/// Errors that end a load attempt.
///
/// Both variants are fatal to the attempt; the session is left in
/// [`LoadState::Failed`] until the next request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// A required artifact could not be fetched.
    #[error("failed to fetch engine artifact `{artifact}`: {reason}")]
    ArtifactFetchFailed {
        /// Name of the artifact.
        artifact: String,
        /// Why the fetch failed.
        reason: String,
    },

    /// The runtime could not be created from the fetched artifacts.
    #[error("engine instantiation failed: {reason}")]
    InstantiationFailed {
        /// Why instantiation failed.
        reason: String,
    },
}

type SharedLoad = Shared<BoxFuture<'static, Result<EngineHandle, LoadError>>>;

/// What a request resolved to while holding the in-flight lock.
enum Pending {
    Loaded(EngineHandle),
    InFlight(SharedLoad),
}

/// Creates the process-wide engine instance on demand.
#[derive(Clone)]
pub struct EngineLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    registry: Arc<SessionRegistry>,
    bridge: Arc<MessageBridge>,
    fetcher: Arc<dyn ArtifactFetcher>,
    factory: Arc<dyn EngineFactory>,
    manifest: ArtifactManifest,
    in_flight: Mutex<Option<SharedLoad>>,
    artifacts: RwLock<Option<Arc<LoadedArtifacts>>>,
    last_surface: Mutex<Option<ContainerId>>,
}

impl EngineLoader {
    /// Create a loader for `manifest`.
    pub fn new(
        registry: Arc<SessionRegistry>,
        bridge: Arc<MessageBridge>,
        fetcher: Arc<dyn ArtifactFetcher>,
        factory: Arc<dyn EngineFactory>,
        manifest: ArtifactManifest,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                registry,
                bridge,
                fetcher,
                factory,
                manifest,
                in_flight: Mutex::new(None),
                artifacts: RwLock::new(None),
                last_surface: Mutex::new(None),
            }),
        }
    }

    /// Ensure the engine exists with its surface in `surface`.
    ///
    /// Joins an in-flight load if there is one; otherwise starts a load
    /// unless an instance already exists, in which case the surface is
    /// re-attached and the existing handle returned.
    ///
    /// # Errors
    ///
    /// Returns the [`LoadError`] of the load this call started or joined.
    pub async fn request_load(&self, surface: &ContainerId) -> Result<EngineHandle, LoadError> {
        let pending = {
            let mut in_flight = lock::lock(&self.inner.in_flight);
            if let Some(load) = in_flight.as_ref() {
                debug!(surface = %surface, "joining in-flight engine load");
                Pending::InFlight(load.clone())
            } else if let Some(handle) = self.inner.registry.get() {
                Pending::Loaded(handle)
            } else {
                let load = self.start(surface.clone());
                *in_flight = Some(load.clone());
                Pending::InFlight(load)
            }
        };

        match pending {
            Pending::Loaded(handle) => {
                *lock::lock(&self.inner.last_surface) = Some(surface.clone());
                if let Err(e) = self.inner.registry.reattach(surface) {
                    warn!(surface = %surface, error = %e, "reattach after load request failed");
                }
                Ok(handle)
            }
            Pending::InFlight(load) => load.await,
        }
    }

    /// Explicit user retry after a failed load.
    ///
    /// # Errors
    ///
    /// Same as [`EngineLoader::request_load`].
    pub async fn retry(&self, surface: &ContainerId) -> Result<EngineHandle, LoadError> {
        info!(surface = %surface, "retrying engine load");
        self.request_load(surface).await
    }

    /// Give up on the engine and show the degraded view.
    ///
    /// Refused while a load is running or once an instance exists. Returns
    /// whether the session switched to [`LoadState::Skipped`].
    pub fn continue_without_engine(&self) -> bool {
        let in_flight = lock::lock(&self.inner.in_flight);
        if in_flight.is_some() {
            debug!("skip refused, load in flight");
            return false;
        }
        self.inner.registry.skip()
    }

    /// Whether a load is currently running.
    pub fn is_loading(&self) -> bool {
        lock::lock(&self.inner.in_flight).is_some()
    }

    /// Container of the most recent load or re-attach request.
    pub fn last_surface(&self) -> Option<ContainerId> {
        lock::lock(&self.inner.last_surface).clone()
    }

    /// Artifacts fetched by the most recent successful fetch phase.
    pub fn artifacts(&self) -> Option<Arc<LoadedArtifacts>> {
        lock::read(&self.inner.artifacts).clone()
    }

    /// The manifest this loader fetches.
    pub fn manifest(&self) -> &ArtifactManifest {
        &self.inner.manifest
    }

    /// Current load state, as tracked by the registry.
    pub fn load_state(&self) -> LoadState {
        self.inner.registry.load_state()
    }

    fn start(&self, surface: ContainerId) -> SharedLoad {
        self.inner.registry.begin_loading();
        *lock::lock(&self.inner.last_surface) = Some(surface.clone());

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _slot = InFlightSlot(Arc::clone(&inner));
            let result = inner.load(&surface).await;
            if let Err(e) = &result {
                warn!(surface = %surface, error = %e, "engine load failed");
                inner.registry.fail(e.to_string());
            }
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(LoadError::InstantiationFailed {
                    reason: format!("load task ended abnormally: {e}"),
                })
            })
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for EngineLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLoader")
            .field("artifacts", &self.inner.manifest.len())
            .field("loading", &self.is_loading())
            .finish_non_exhaustive()
    }
}

/// Frees the in-flight slot when the load task ends, however it ends.
struct InFlightSlot(Arc<LoaderInner>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        *lock::lock(&self.0.in_flight) = None;
    }
}

impl LoaderInner {
    async fn load(&self, surface: &ContainerId) -> Result<EngineHandle, LoadError> {
        if self.registry.container_bounds(surface).is_none() {
            return Err(LoadError::InstantiationFailed {
                reason: format!("container `{surface}` not found"),
            });
        }

        info!(surface = %surface, artifacts = self.manifest.len(), "loading engine");
        let artifacts = self.fetch_artifacts().await?;
        debug!(bytes = artifacts.total_bytes(), "engine artifacts fetched");

        let sink = ProgressSink::new(
            Arc::clone(&self.registry),
            FETCH_SHARE,
            IN_FLIGHT_CEILING - FETCH_SHARE,
        );
        let instance = self
            .factory
            .instantiate(artifacts, surface.clone(), sink)
            .await
            .map_err(|e| LoadError::InstantiationFailed {
                reason: e.to_string(),
            })?;

        instance.bind_inbound(self.bridge.inbound_port());
        let handle = EngineHandle::new(instance);
        self.registry.set(handle.clone(), surface);
        self.bridge.replay_context();

        info!(session = %handle.id(), surface = %surface, "engine loaded");
        Ok(handle)
    }

    async fn fetch_artifacts(&self) -> Result<Arc<LoadedArtifacts>, LoadError> {
        let progress = FetchProgress {
            sink: ProgressSink::new(Arc::clone(&self.registry), 0.0, FETCH_SHARE),
            done: AtomicUsize::new(0),
            total: self.manifest.len(),
        };

        let fetched = future::try_join_all(
            self.manifest
                .iter()
                .map(|artifact| self.fetch_one(artifact, &progress)),
        )
        .await?;

        let loaded = Arc::new(LoadedArtifacts::new(fetched));
        *lock::write(&self.artifacts) = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    async fn fetch_one(
        &self,
        artifact: &Artifact,
        progress: &FetchProgress,
    ) -> Result<FetchedArtifact, LoadError> {
        let bytes = self.fetcher.fetch(artifact).await.map_err(|e| {
            LoadError::ArtifactFetchFailed {
                artifact: artifact.name.clone(),
                reason: e.to_string(),
            }
        })?;
        debug!(artifact = %artifact.name, bytes = bytes.len(), "artifact fetched");
        progress.advance();
        Ok(FetchedArtifact {
            artifact: artifact.clone(),
            bytes: bytes.into(),
        })
    }
}

/// Completed-download counter for the fetch phase.
struct FetchProgress {
    sink: ProgressSink,
    done: AtomicUsize,
    total: usize,
}

impl FetchProgress {
    fn advance(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        self.sink.report(progress::fraction(done, self.total));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use twin_types::{ContextKey, Rect};

    use super::*;
    use crate::config::EngineConfig;
    use crate::surface::{Layout, SharedLayout};
    use crate::testing::{RecordingFactory, StaticFetcher};

    struct Fixture {
        registry: Arc<SessionRegistry>,
        bridge: Arc<MessageBridge>,
        fetcher: Arc<StaticFetcher>,
        factory: Arc<RecordingFactory>,
        loader: EngineLoader,
    }

    fn fixture(fetcher: StaticFetcher, factory: RecordingFactory) -> Fixture {
        let layout = Arc::new(SharedLayout::new());
        layout.set(ContainerId::new("canvasA"), Rect::new(0.0, 0.0, 800.0, 600.0));
        layout.set(ContainerId::new("canvasB"), Rect::new(0.0, 0.0, 400.0, 300.0));
        let registry = Arc::new(SessionRegistry::new(layout as Arc<dyn Layout>));
        let bridge = Arc::new(MessageBridge::new(Arc::clone(&registry), "GameManager"));
        let fetcher = Arc::new(fetcher);
        let factory = Arc::new(factory);
        let loader = EngineLoader::new(
            Arc::clone(&registry),
            Arc::clone(&bridge),
            Arc::clone(&fetcher) as Arc<dyn ArtifactFetcher>,
            Arc::clone(&factory) as Arc<dyn EngineFactory>,
            EngineConfig::default().manifest(),
        );
        Fixture {
            registry,
            bridge,
            fetcher,
            factory,
            loader,
        }
    }

    fn canvas(id: &str) -> ContainerId {
        ContainerId::new(id)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_load() {
        let f = fixture(
            StaticFetcher::new().with_delay(Duration::from_millis(50)),
            RecordingFactory::new(),
        );

        let surface = canvas("canvasA");
        let (a, b, c) = tokio::join!(
            f.loader.request_load(&surface),
            f.loader.request_load(&surface),
            f.loader.request_load(&surface),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert!(a.same_instance(&b));
        assert!(a.same_instance(&c));
        assert_eq!(a.id(), c.id());
        assert_eq!(f.factory.instantiations(), 1);
        assert_eq!(f.fetcher.calls(), f.loader.manifest().len());
    }

    #[tokio::test]
    async fn rapid_requests_fetch_each_artifact_once() {
        let f = fixture(StaticFetcher::new(), RecordingFactory::new());
        let canvas_a = canvas("canvasA");
        let first = f.loader.request_load(&canvas_a);
        let second = f.loader.request_load(&canvas_a);
        let (first, second) = tokio::join!(first, second);

        assert!(first.unwrap().same_instance(&second.unwrap()));
        assert_eq!(f.fetcher.calls(), 4);
        assert!(f.loader.artifacts().is_some());
        assert!(!f.loader.is_loading());
    }

    #[tokio::test]
    async fn loaded_engine_is_reattached_not_recreated() {
        let f = fixture(StaticFetcher::new(), RecordingFactory::new());
        let first = f.loader.request_load(&canvas("canvasA")).await.unwrap();
        let second = f.loader.request_load(&canvas("canvasB")).await.unwrap();

        assert!(first.same_instance(&second));
        assert_eq!(f.factory.instantiations(), 1);
        assert_eq!(f.registry.status().surface, Some(canvas("canvasB")));
        assert_eq!(f.loader.last_surface(), Some(canvas("canvasB")));
        let engine = f.factory.last_engine().unwrap();
        assert_eq!(engine.resizes(), vec![(800, 600), (400, 300)]);
    }

    #[tokio::test]
    async fn fetch_failure_marks_session_failed_and_retry_recovers() {
        let f = fixture(
            StaticFetcher::new().failing("factoryTwin.wasm"),
            RecordingFactory::new(),
        );

        let err = f.loader.request_load(&canvas("canvasA")).await.unwrap_err();
        assert_eq!(
            err,
            LoadError::ArtifactFetchFailed {
                artifact: "factoryTwin.wasm".to_owned(),
                reason: "404 Not Found".to_owned(),
            }
        );
        let status = f.registry.status();
        assert_eq!(status.load_state, LoadState::Failed);
        assert!(status.last_error.unwrap().contains("factoryTwin.wasm"));
        assert!(status.progress < 100.0);
        assert_eq!(f.factory.instantiations(), 0);

        f.fetcher.clear_failure();
        let handle = f.loader.retry(&canvas("canvasA")).await.unwrap();
        let status = f.registry.status();
        assert_eq!(status.load_state, LoadState::Loaded);
        assert!(status.last_error.is_none());
        assert_eq!(status.session_id, Some(handle.id()));
    }

    #[tokio::test]
    async fn instantiation_failure_is_reported() {
        let f = fixture(StaticFetcher::new(), RecordingFactory::new().failing());
        let err = f.loader.request_load(&canvas("canvasA")).await.unwrap_err();
        assert!(matches!(err, LoadError::InstantiationFailed { .. }));
        assert_eq!(f.registry.load_state(), LoadState::Failed);
        assert!(f.registry.get().is_none());
    }

    #[tokio::test]
    async fn unknown_container_fails_before_fetching() {
        let f = fixture(StaticFetcher::new(), RecordingFactory::new());
        let err = f.loader.request_load(&canvas("nowhere")).await.unwrap_err();
        assert!(matches!(err, LoadError::InstantiationFailed { .. }));
        assert_eq!(f.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn progress_never_decreases_and_ends_at_100() {
        let f = fixture(StaticFetcher::new(), RecordingFactory::new());
        let mut rx = f.registry.subscribe();
        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let status = rx.borrow_and_update().clone();
                seen.push(status.progress);
                if status.load_state == LoadState::Loaded {
                    break;
                }
            }
            seen
        });

        f.loader.request_load(&canvas("canvasA")).await.unwrap();
        let seen = watcher.await.unwrap();

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
        let (last, in_flight) = seen.split_last().unwrap();
        assert!((last - 100.0).abs() < f64::EPSILON);
        assert!(in_flight.iter().all(|p| *p <= IN_FLIGHT_CEILING));
    }

    #[tokio::test(start_paused = true)]
    async fn load_completes_after_callers_give_up() {
        let f = fixture(
            StaticFetcher::new().with_delay(Duration::from_millis(100)),
            RecordingFactory::new(),
        );

        let gave_up =
            tokio::time::timeout(Duration::from_millis(10), f.loader.request_load(&canvas("canvasA")))
                .await;
        assert!(gave_up.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(f.registry.is_loaded());
        assert!(!f.loader.is_loading());
    }

    #[tokio::test]
    async fn context_replayed_and_inbound_wired_after_load() {
        let f = fixture(StaticFetcher::new(), RecordingFactory::new());
        f.bridge.set_context(ContextKey::new("1"));
        let mut notifications = f.bridge.subscribe();

        f.loader.request_load(&canvas("canvasA")).await.unwrap();

        let engine = f.factory.last_engine().unwrap();
        assert_eq!(engine.methods(), vec!["SetContext"]);

        engine
            .inbound()
            .unwrap()
            .notify(r#"{"kind":"click","entityKind":"robot","entityId":"R1"}"#)
            .unwrap();
        assert_eq!(
            notifications.recv().await.unwrap().entity_id.unwrap().as_str(),
            "R1"
        );
    }

    #[tokio::test]
    async fn skip_then_load_starts_fresh() {
        let f = fixture(StaticFetcher::new(), RecordingFactory::new());
        assert!(f.loader.continue_without_engine());
        assert_eq!(f.loader.load_state(), LoadState::Skipped);

        f.loader.request_load(&canvas("canvasA")).await.unwrap();
        assert_eq!(f.loader.load_state(), LoadState::Loaded);
        assert!(!f.loader.continue_without_engine());
    }
}
