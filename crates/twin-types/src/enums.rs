//! Enumeration types shared by the engine session, the bridge protocol and
//! the overlay state machines.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// The kind of factory object tracked by the digital twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum EntityKind {
    /// An assembly robot.
    Robot,
    /// A process station on the line (door assembly, leak test, ...).
    Station,
    /// A product (vehicle body) moving along the line.
    Product,
}

impl EntityKind {
    /// All kinds, in the order snapshots are pushed to the engine.
    pub const ALL: [Self; 3] = [Self::Robot, Self::Station, Self::Product];

    /// Lower-case wire name, also used as the backend path segment.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Robot => "robot",
            Self::Station => "station",
            Self::Product => "product",
        }
    }

    /// Parse a wire name. Accepts the plural snapshot keys and the
    /// `process` alias the engine uses for stations.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "robot" | "robots" => Some(Self::Robot),
            "station" | "stations" | "process" => Some(Self::Station),
            "product" | "products" | "car" | "vehicle" => Some(Self::Product),
            _ => None,
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pointer notifications
// ---------------------------------------------------------------------------

/// What the pointer did to an entity inside the engine's scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum PointerKind {
    /// The entity was clicked.
    Click,
    /// The pointer started hovering the entity.
    HoverEnter,
    /// The pointer left the entity.
    HoverExit,
}

impl PointerKind {
    /// Parse a wire name (`click`, `hoverEnter`, `hover_exit`, ...).
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "click" | "clicked" => Some(Self::Click),
            "hoverenter" | "hover" | "enter" => Some(Self::HoverEnter),
            "hoverexit" | "hoverleave" | "exit" | "leave" => Some(Self::HoverExit),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine session
// ---------------------------------------------------------------------------

/// Lifecycle state of the process-wide engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum LoadState {
    /// No load has been requested (or the session was cleared).
    #[default]
    Idle,
    /// Artifacts are being fetched or the instance is being created.
    Loading,
    /// An instance exists and is wired to the bridge.
    Loaded,
    /// The last load failed; a retry starts from scratch.
    Failed,
    /// The user chose to continue without the engine (degraded view).
    Skipped,
}

impl LoadState {
    /// Whether an engine instance is available for pushes.
    pub const fn is_loaded(self) -> bool {
        matches!(self, Self::Loaded)
    }
}
