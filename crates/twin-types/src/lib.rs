//! Shared type definitions for the factory digital-twin live-sync host.
//!
//! Every type that crosses a boundary (host → engine, engine → host,
//! host → page) is defined here once. Types are exported to `TypeScript`
//! via `ts-rs` so the page-side glue uses the same shapes.
//!
//! # Modules
//!
//! - [`ids`] -- Session UUIDs and string keys for entities, tenant contexts
//!   and layout containers
//! - [`enums`] -- Entity kinds, pointer kinds and the session load state
//! - [`geometry`] -- Screen points, container rectangles, engine positions
//! - [`structs`] -- Entity updates, pointer notifications, session status

pub mod enums;
pub mod geometry;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{EntityKind, LoadState, PointerKind};
pub use geometry::{EnginePosition, Rect, ScreenPoint};
pub use ids::{ContainerId, ContextKey, EntityId, SessionId};
pub use structs::{Attributes, EntityUpdate, PointerNotification, SessionStatus};
