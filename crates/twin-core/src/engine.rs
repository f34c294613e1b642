//! Seams between the host and the external engine runtime.
//!
//! The runtime is a stateful process the host does not own: it is fetched as
//! a set of artifacts, instantiated against a display surface, and then
//! driven through a narrow command / notification interface. Each step is a
//! trait so the loader and registry can be exercised against fakes.
//!
//! Trait methods that suspend return [`BoxFuture`] so the traits stay
//! dyn-compatible and can be shared as `Arc<dyn ...>`.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use twin_types::{ContainerId, SessionId};

use crate::bridge::{InboundPort, OutboundMessage};
use crate::progress::ProgressSink;

/// Errors raised by an engine instance or factory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine refused or could not accept a command.
    #[error("engine rejected message: {0}")]
    Delivery(String),

    /// The engine could not be resized to its new container.
    #[error("engine resize failed: {0}")]
    Resize(String),

    /// The engine failed while shutting down.
    #[error("engine teardown failed: {0}")]
    Teardown(String),

    /// The engine could not be created from the fetched artifacts.
    #[error("engine instantiation failed: {0}")]
    Instantiation(String),
}

/// A live engine instance.
///
/// Implementations must be cheap to call from the host's event loop:
/// [`deliver`](Self::deliver), [`resize`](Self::resize) and
/// [`resume`](Self::resume) hand work to the runtime and return.
pub trait EngineInstance: Send + Sync {
    /// Install the bridge's inbound entry points so the engine can emit
    /// pointer notifications.
    fn bind_inbound(&self, port: InboundPort);

    /// Hand one command to the engine's inbound entry point.
    fn deliver(&self, message: &OutboundMessage) -> Result<(), EngineError>;

    /// Resize the engine's backing buffer to the new container dimensions.
    fn resize(&self, width: u32, height: u32) -> Result<(), EngineError>;

    /// Tell the engine its page is visible again.
    fn resume(&self) -> Result<(), EngineError>;

    /// Shut the runtime down. Only called on application teardown.
    fn quit(&self) -> BoxFuture<'static, Result<(), EngineError>>;
}

/// Shared handle to the process-wide engine instance.
///
/// Cloning is cheap; clones refer to the same instance and carry the same
/// [`SessionId`].
#[derive(Clone)]
pub struct EngineHandle {
    id: SessionId,
    instance: Arc<dyn EngineInstance>,
}

impl EngineHandle {
    /// Wrap a freshly created instance, minting a new session id.
    pub fn new(instance: Arc<dyn EngineInstance>) -> Self {
        Self {
            id: SessionId::new(),
            instance,
        }
    }

    /// Session id of this instance.
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// The underlying instance.
    pub fn instance(&self) -> &dyn EngineInstance {
        self.instance.as_ref()
    }

    /// Whether two handles refer to the same underlying instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// What an artifact is used for by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactRole {
    /// Bootstrap script that knows how to create the instance.
    LoaderScript,
    /// Runtime framework glue.
    FrameworkScript,
    /// Scene and asset data payload.
    Data,
    /// Compiled code payload.
    Code,
}

/// One runtime artifact to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Role of the artifact in the build.
    pub role: ArtifactRole,
    /// File name, also used as the key the page requests it by.
    pub name: String,
    /// Absolute URL to fetch.
    pub url: String,
}

/// Ordered list of artifacts that make up one runtime build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactManifest {
    artifacts: Vec<Artifact>,
}

impl ArtifactManifest {
    /// Build a manifest from an ordered artifact list.
    pub const fn new(artifacts: Vec<Artifact>) -> Self {
        Self { artifacts }
    }

    /// Iterate artifacts in fetch order.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    /// Number of artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// An artifact together with its fetched bytes.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    /// The artifact that was fetched.
    pub artifact: Artifact,
    /// Its contents.
    pub bytes: Arc<[u8]>,
}

/// Every artifact of a build, fetched and ready for instantiation.
#[derive(Debug, Clone, Default)]
pub struct LoadedArtifacts {
    fetched: Vec<FetchedArtifact>,
}

impl LoadedArtifacts {
    /// Collect fetched artifacts.
    pub const fn new(fetched: Vec<FetchedArtifact>) -> Self {
        Self { fetched }
    }

    /// Look an artifact up by role.
    pub fn by_role(&self, role: ArtifactRole) -> Option<&FetchedArtifact> {
        self.fetched.iter().find(|f| f.artifact.role == role)
    }

    /// Look an artifact up by file name.
    pub fn by_name(&self, name: &str) -> Option<&FetchedArtifact> {
        self.fetched.iter().find(|f| f.artifact.name == name)
    }

    /// Iterate every fetched artifact.
    pub fn iter(&self) -> impl Iterator<Item = &FetchedArtifact> {
        self.fetched.iter()
    }

    /// Total payload size in bytes.
    pub fn total_bytes(&self) -> usize {
        self.fetched.iter().map(|f| f.bytes.len()).sum()
    }
}

/// Failure to fetch a single artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct FetchError(pub String);

/// Fetches runtime artifacts by URL.
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch one artifact's bytes.
    fn fetch<'a>(&'a self, artifact: &'a Artifact) -> BoxFuture<'a, Result<Vec<u8>, FetchError>>;
}

/// Creates an engine instance from fetched artifacts.
pub trait EngineFactory: Send + Sync {
    /// Instantiate the runtime against the display surface in `surface`.
    ///
    /// `progress` accepts fractions in `[0, 1]` of the instantiation phase.
    fn instantiate(
        &self,
        artifacts: Arc<LoadedArtifacts>,
        surface: ContainerId,
        progress: ProgressSink,
    ) -> BoxFuture<'static, Result<Arc<dyn EngineInstance>, EngineError>>;
}
