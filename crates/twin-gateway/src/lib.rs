//! Gateway for the factory twin host.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **Engine entry points**: the `/ws/engine` socket (commands down,
//!   pointer notifications up), per-kind click endpoints and the
//!   artifact download route the page boots the runtime from
//! - **Presentation API** under `/api` for the loading indicator, the
//!   layout, the sync loop, the active context and the detail overlay
//! - **Overlay stream** (`/ws/overlay`) pushing the hover / overlay view
//!   on every change
//! - **Minimal HTML status page** (`GET /`)
//!
//! # Architecture
//!
//! [`AppState`] owns one registry, bridge, loader, sync loop and
//! correlator. The engine instance the loader creates is a
//! [`SocketEngine`](engine::SocketEngine): its commands fan out over an
//! [`EngineLink`](engine::EngineLink) to every connected engine socket.

pub mod engine;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use engine::{EngineCommand, EngineLink, SocketEngineFactory};
pub use error::GatewayError;
pub use router::build_router;
pub use server::{ServerError, start_server};
pub use state::{AppState, Backends, Defaults};
