//! Process-wide engine session registry.
//!
//! [`SessionRegistry`] owns the single [`EngineSession`]: the live engine
//! handle, the display surface placement, and the load state shown by the
//! page's loading indicator. It is created once at startup and injected into
//! every component that needs the engine; views come and go without touching
//! it.
//!
//! # Ownership
//!
//! Only the registry and the [`EngineLoader`](crate::loader::EngineLoader)
//! mutate the session. Everything else reads through [`SessionRegistry::get`]
//! and [`SessionRegistry::surface_bounds`].
//!
//! # Status
//!
//! Every mutation republishes a [`SessionStatus`] on a
//! [`tokio::sync::watch`] channel so subscribers always see the latest state
//! without polling.

use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use twin_types::{ContainerId, LoadState, Rect, SessionStatus};

use crate::engine::EngineHandle;
use crate::lock;
use crate::progress::ProgressTracker;
use crate::surface::{DisplaySurface, Layout};

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// There is no engine instance to operate on.
    #[error("no engine instance is loaded")]
    NotLoaded,

    /// The target container is not on the page.
    #[error("container `{0}` not found")]
    ContainerNotFound(ContainerId),
}

/// Outcome of a re-attach request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reattach {
    /// The surface already lived in the target container; nothing happened.
    Unchanged,
    /// The surface moved and the engine was resized to `bounds`.
    Moved {
        /// Bounds of the new container.
        bounds: Rect,
    },
}

/// The process-wide engine session.
#[derive(Debug, Default)]
pub struct EngineSession {
    handle: Option<EngineHandle>,
    surface: DisplaySurface,
    load_state: LoadState,
    progress: ProgressTracker,
    last_error: Option<String>,
}

impl EngineSession {
    fn status(&self) -> SessionStatus {
        SessionStatus {
            load_state: self.load_state,
            progress: self.progress.percent(),
            last_error: self.last_error.clone(),
            surface: self.surface.parent().cloned(),
            session_id: self.handle.as_ref().map(EngineHandle::id),
        }
    }
}

/// Owner of the single engine session.
pub struct SessionRegistry {
    session: RwLock<EngineSession>,
    layout: Arc<dyn Layout>,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionRegistry {
    /// Create an empty registry resolving container bounds through `layout`.
    pub fn new(layout: Arc<dyn Layout>) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            session: RwLock::new(EngineSession::default()),
            layout,
            status_tx,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The live engine handle, if an instance exists.
    pub fn get(&self) -> Option<EngineHandle> {
        lock::read(&self.session).handle.clone()
    }

    /// Whether an instance is loaded and wired.
    pub fn is_loaded(&self) -> bool {
        let session = lock::read(&self.session);
        session.load_state.is_loaded() && session.handle.is_some()
    }

    /// Current load state.
    pub fn load_state(&self) -> LoadState {
        lock::read(&self.session).load_state
    }

    /// Current status snapshot.
    pub fn status(&self) -> SessionStatus {
        lock::read(&self.session).status()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Bounding rectangle of the container currently holding the surface.
    ///
    /// `None` when the surface is detached or its container is gone.
    pub fn surface_bounds(&self) -> Option<Rect> {
        let parent = lock::read(&self.session).surface.parent().cloned()?;
        self.layout.bounds(&parent)
    }

    /// Bounds of an arbitrary container.
    pub fn container_bounds(&self, container: &ContainerId) -> Option<Rect> {
        self.layout.bounds(container)
    }

    // -----------------------------------------------------------------------
    // Load lifecycle (driven by the loader)
    // -----------------------------------------------------------------------

    /// Enter `Loading`, clearing any previous failure and progress.
    pub fn begin_loading(&self) {
        self.mutate(|session| {
            session.load_state = LoadState::Loading;
            session.last_error = None;
            session.progress.reset();
        });
    }

    /// Advance load progress (monotonic, capped below 100).
    pub fn report_progress(&self, percent: f64) {
        let changed = {
            let mut session = lock::write(&self.session);
            session.load_state == LoadState::Loading && session.progress.advance_to(percent)
        };
        if changed {
            self.publish();
        }
    }

    /// Record a failed load.
    pub fn fail(&self, message: String) {
        self.mutate(|session| {
            session.load_state = LoadState::Failed;
            session.last_error = Some(message);
        });
    }

    /// Continue without the engine. Only valid when no instance exists and
    /// no load is running; returns whether the state changed.
    pub fn skip(&self) -> bool {
        let skipped = {
            let mut session = lock::write(&self.session);
            let allowed = session.handle.is_none()
                && matches!(session.load_state, LoadState::Idle | LoadState::Failed);
            if allowed {
                session.load_state = LoadState::Skipped;
                session.last_error = None;
            }
            allowed
        };
        if skipped {
            info!("continuing without engine");
            self.publish();
        }
        skipped
    }

    // -----------------------------------------------------------------------
    // Registry contract
    // -----------------------------------------------------------------------

    /// Store a freshly created instance and place its surface in `surface`.
    pub fn set(&self, handle: EngineHandle, surface: &ContainerId) -> Reattach {
        let bounds = self.layout.bounds(surface);
        let session_id = handle.id();
        self.mutate(|session| {
            session.handle = Some(handle);
            session.surface.move_to(surface.clone());
            session.load_state = LoadState::Loaded;
            session.last_error = None;
            session.progress.complete();
        });
        info!(session = %session_id, surface = %surface, "engine session stored");

        match bounds {
            Some(bounds) => {
                self.resize_engine(bounds);
                Reattach::Moved { bounds }
            }
            None => {
                debug!(surface = %surface, "surface container has no layout yet, skipping resize");
                Reattach::Unchanged
            }
        }
    }

    /// Move the display surface into `target` without recreating the engine.
    ///
    /// Idempotent: re-attaching to the current container is a no-op.
    pub fn reattach(&self, target: &ContainerId) -> Result<Reattach, RegistryError> {
        let bounds = {
            let mut session = lock::write(&self.session);
            if session.handle.is_none() {
                return Err(RegistryError::NotLoaded);
            }
            if session.surface.is_attached_to(target) {
                debug!(surface = %target, "surface already attached, reattach is a no-op");
                return Ok(Reattach::Unchanged);
            }
            let bounds = self
                .layout
                .bounds(target)
                .ok_or_else(|| RegistryError::ContainerNotFound(target.clone()))?;
            let previous = session.surface.move_to(target.clone());
            info!(
                from = previous.as_ref().map(ContainerId::as_str),
                to = %target,
                "display surface reattached"
            );
            bounds
        };

        self.resize_engine(bounds);
        self.publish();
        Ok(Reattach::Moved { bounds })
    }

    /// React to the hosting page's visibility changing.
    ///
    /// Becoming visible issues a resume to the engine; hiding does nothing
    /// (the engine keeps simulating in the background). Returns whether a
    /// resume was issued.
    pub fn on_visibility_change(&self, visible: bool) -> bool {
        if !visible {
            debug!("page hidden, engine keeps running");
            return false;
        }
        let Some(handle) = self.get() else {
            return false;
        };
        match handle.instance().resume() {
            Ok(()) => {
                debug!(session = %handle.id(), "engine resumed after page became visible");
                true
            }
            Err(e) => {
                warn!(session = %handle.id(), error = %e, "engine resume failed");
                false
            }
        }
    }

    /// Tear the engine down and reset the session.
    ///
    /// Reserved for application shutdown or an explicit full reset. Teardown
    /// is requested before the handle is dropped; teardown errors are logged.
    pub async fn clear(&self) {
        let Some(handle) = self.get() else {
            self.mutate(|session| {
                *session = EngineSession::default();
            });
            return;
        };

        info!(session = %handle.id(), "tearing down engine session");
        if let Err(e) = handle.instance().quit().await {
            warn!(session = %handle.id(), error = %e, "engine teardown reported an error");
        }

        self.mutate(|session| {
            *session = EngineSession::default();
        });
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn resize_engine(&self, bounds: Rect) {
        let Some(handle) = self.get() else {
            return;
        };
        let (width, height) = bounds.pixel_size();
        if let Err(e) = handle.instance().resize(width, height) {
            warn!(session = %handle.id(), width, height, error = %e, "engine resize failed");
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut EngineSession)) {
        {
            let mut session = lock::write(&self.session);
            f(&mut session);
        }
        self.publish();
    }

    fn publish(&self) {
        let status = lock::read(&self.session).status();
        self.status_tx.send_replace(status);
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session", &*lock::read(&self.session))
            .finish_non_exhaustive()
    }
}
