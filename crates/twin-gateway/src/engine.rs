//! Engine runtime reached over the page's engine socket.
//!
//! The runtime itself runs in the page. The host talks to it through an
//! [`EngineLink`]: commands fan out to every connected `/ws/engine` socket
//! and notifications come back through the inbound port the loader binds.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use twin_core::bridge::{InboundPort, OutboundMessage};
use twin_core::engine::{
    ArtifactRole, EngineError, EngineFactory, EngineInstance, LoadedArtifacts,
};
use twin_core::progress::ProgressSink;
use twin_types::ContainerId;

const COMMAND_CAPACITY: usize = 256;

/// Roles that must be present and non-empty before the page can boot the
/// runtime.
const REQUIRED_ROLES: [ArtifactRole; 2] = [ArtifactRole::LoaderScript, ArtifactRole::Code];

/// A command sent down the engine socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineCommand {
    /// Boot the runtime inside `surface` from the named artifacts.
    #[serde(rename_all = "camelCase")]
    Instantiate {
        /// Container holding the display surface.
        surface: ContainerId,
        /// Artifact names, fetchable from `/engine/artifacts/{name}`.
        artifacts: Vec<String>,
    },
    /// Invoke `method` on the receiver object `target`.
    Message {
        /// Receiver object inside the engine scene.
        target: String,
        /// Method name.
        method: String,
        /// JSON-encoded argument.
        payload: String,
    },
    /// Resize the backing buffer.
    Resize {
        /// New width in pixels.
        width: u32,
        /// New height in pixels.
        height: u32,
    },
    /// The page is visible again.
    Resume,
    /// Shut the runtime down.
    Quit,
}

impl From<&OutboundMessage> for EngineCommand {
    fn from(message: &OutboundMessage) -> Self {
        Self::Message {
            target: message.target.clone(),
            method: message.method.clone(),
            payload: message.payload.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct LinkSlots {
    inbound: Option<InboundPort>,
    boot: Option<EngineCommand>,
}

/// Channel between engine instances and the page's engine sockets.
#[derive(Debug, Clone)]
pub struct EngineLink {
    tx: broadcast::Sender<EngineCommand>,
    slots: Arc<Mutex<LinkSlots>>,
}

impl EngineLink {
    /// Create a link with no connected sockets.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(COMMAND_CAPACITY);
        Self {
            tx,
            slots: Arc::new(Mutex::new(LinkSlots::default())),
        }
    }

    /// Attach a socket: the boot instruction of the current instance, if
    /// any, and the live command stream that follows it.
    ///
    /// Taken under the slot lock that boot and quit are published under: a
    /// socket sees the boot command exactly once, replayed or broadcast.
    pub fn connect(&self) -> (Option<EngineCommand>, broadcast::Receiver<EngineCommand>) {
        let slots = self.slots();
        (slots.boot.clone(), self.tx.subscribe())
    }

    /// Number of connected sockets.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Inbound port of the current instance.
    pub fn inbound(&self) -> Option<InboundPort> {
        self.slots().inbound.clone()
    }

    fn send(&self, command: EngineCommand) -> Result<usize, EngineError> {
        self.tx
            .send(command)
            .map_err(|broadcast::error::SendError(_)| {
                EngineError::Delivery("no engine socket connected".to_owned())
            })
    }

    /// Broadcast without requiring a listener.
    fn publish(&self, command: EngineCommand) -> usize {
        self.tx.send(command).unwrap_or(0)
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, LinkSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EngineLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine instance whose runtime lives behind the engine socket.
#[derive(Debug)]
pub struct SocketEngine {
    link: EngineLink,
}

impl EngineInstance for SocketEngine {
    fn bind_inbound(&self, port: InboundPort) {
        self.link.slots().inbound = Some(port);
    }

    fn deliver(&self, message: &OutboundMessage) -> Result<(), EngineError> {
        self.link.send(EngineCommand::from(message)).map(|_| ())
    }

    fn resize(&self, width: u32, height: u32) -> Result<(), EngineError> {
        self.link
            .send(EngineCommand::Resize { width, height })
            .map(|_| ())
            .map_err(|e| EngineError::Resize(e.to_string()))
    }

    fn resume(&self) -> Result<(), EngineError> {
        self.link.send(EngineCommand::Resume).map(|_| ())
    }

    fn quit(&self) -> BoxFuture<'static, Result<(), EngineError>> {
        let link = self.link.clone();
        async move {
            let sockets = {
                let mut slots = link.slots();
                slots.inbound = None;
                slots.boot = None;
                link.publish(EngineCommand::Quit)
            };
            info!(sockets, "engine quit sent");
            Ok(())
        }
        .boxed()
    }
}

/// Factory creating [`SocketEngine`]s on a shared [`EngineLink`].
#[derive(Debug, Clone)]
pub struct SocketEngineFactory {
    link: EngineLink,
}

impl SocketEngineFactory {
    /// Create a factory publishing boot commands on `link`.
    pub const fn new(link: EngineLink) -> Self {
        Self { link }
    }
}

impl EngineFactory for SocketEngineFactory {
    fn instantiate(
        &self,
        artifacts: Arc<LoadedArtifacts>,
        surface: ContainerId,
        progress: ProgressSink,
    ) -> BoxFuture<'static, Result<Arc<dyn EngineInstance>, EngineError>> {
        let link = self.link.clone();
        async move {
            for role in REQUIRED_ROLES {
                match artifacts.by_role(role) {
                    Some(fetched) if !fetched.bytes.is_empty() => {}
                    Some(fetched) => {
                        return Err(EngineError::Instantiation(format!(
                            "artifact `{}` is empty",
                            fetched.artifact.name
                        )));
                    }
                    None => {
                        return Err(EngineError::Instantiation(format!(
                            "build has no {role:?} artifact"
                        )));
                    }
                }
            }
            progress.report(0.5);

            let boot = EngineCommand::Instantiate {
                surface,
                artifacts: artifacts.iter().map(|f| f.artifact.name.clone()).collect(),
            };
            let sockets = {
                let mut slots = link.slots();
                slots.boot = Some(boot.clone());
                link.publish(boot)
            };
            debug!(sockets, bytes = artifacts.total_bytes(), "boot command published");
            progress.report(1.0);

            Ok(Arc::new(SocketEngine { link }) as Arc<dyn EngineInstance>)
        }
        .boxed()
    }
}
