//! Engine session lifecycle and live synchronization for the factory
//! digital twin.
//!
//! The host embeds an external 3D engine that renders the factory floor. This
//! crate owns everything between that engine and the backend: creating the
//! engine once, keeping it alive while views come and go, moving data into it
//! and routing its pointer notifications back out.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `twin-config.yaml` into
//!   strongly-typed structs.
//! - [`engine`] -- [`EngineInstance`], [`ArtifactFetcher`] and
//!   [`EngineFactory`] seams plus the artifact manifest.
//! - [`registry`] -- [`SessionRegistry`], owner of the single engine session.
//! - [`surface`] -- Display surface placement and container layout.
//! - [`progress`] -- Monotonic load progress.
//! - [`loader`] -- [`EngineLoader`] with single-flight deduplication.
//! - [`bridge`] -- [`MessageBridge`] for host ↔ engine messages.
//! - [`inbound`] -- Parsing of engine notifications.
//! - [`sources`] -- Backend snapshot and detail sources.
//! - [`sync`] -- [`SyncLoop`] pushing snapshots into the engine.
//!
//! [`EngineInstance`]: engine::EngineInstance
//! [`ArtifactFetcher`]: engine::ArtifactFetcher
//! [`EngineFactory`]: engine::EngineFactory
//! [`SessionRegistry`]: registry::SessionRegistry
//! [`EngineLoader`]: loader::EngineLoader
//! [`MessageBridge`]: bridge::MessageBridge
//! [`SyncLoop`]: sync::SyncLoop

pub mod bridge;
pub mod config;
pub mod engine;
pub mod inbound;
pub mod loader;
mod lock;
pub mod progress;
pub mod registry;
pub mod sources;
pub mod surface;
pub mod sync;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
