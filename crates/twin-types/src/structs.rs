//! Core structs exchanged between the host, the engine and the page.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{EntityKind, LoadState, PointerKind};
use crate::geometry::EnginePosition;
use crate::ids::{ContainerId, EntityId, SessionId};

/// Free-form field → value mapping carried by updates and previews.
pub type Attributes = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Host -> engine
// ---------------------------------------------------------------------------

/// Per-entity state pushed into the engine by the synchronization loop.
///
/// Fire-and-forget: the engine never acknowledges an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct EntityUpdate {
    /// Which kind of entity this update targets.
    pub entity_kind: EntityKind,
    /// Backend id of the entity.
    pub entity_id: EntityId,
    /// Latest attribute values from the backend snapshot.
    pub attributes: Attributes,
    /// When the host produced this update.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Engine -> host
// ---------------------------------------------------------------------------

/// A validated click / hover notification emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PointerNotification {
    /// What the pointer did.
    pub kind: PointerKind,
    /// Kind of the entity under the pointer.
    pub entity_kind: EntityKind,
    /// Id of the entity, when the engine reported one.
    pub entity_id: Option<EntityId>,
    /// Where the pointer was, when the engine reported it.
    pub position: Option<EnginePosition>,
    /// Remaining payload fields, used verbatim as hover preview data.
    #[serde(default)]
    pub preview: Attributes,
}

// ---------------------------------------------------------------------------
// Session status (published to the page)
// ---------------------------------------------------------------------------

/// Snapshot of the engine session as shown by the loading indicator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SessionStatus {
    /// Current lifecycle state.
    pub load_state: LoadState,
    /// Load progress in percent (0-100). Reaches 100 only once loaded.
    pub progress: f64,
    /// Message of the last load failure, cleared when a retry starts.
    pub last_error: Option<String>,
    /// Container currently holding the display surface.
    pub surface: Option<ContainerId>,
    /// Id of the live engine instance, if any.
    pub session_id: Option<SessionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_update_wire_shape() {
        let mut attributes = Attributes::new();
        attributes.insert("status".to_owned(), serde_json::json!("active"));
        let update = EntityUpdate {
            entity_kind: EntityKind::Robot,
            entity_id: EntityId::new("R1"),
            attributes,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&update).unwrap_or_default();
        assert_eq!(value["entityKind"], "robot");
        assert_eq!(value["entityId"], "R1");
        assert_eq!(value["attributes"]["status"], "active");
    }

    #[test]
    fn default_status_is_idle() {
        let status = SessionStatus::default();
        assert_eq!(status.load_state, LoadState::Idle);
        assert!(status.session_id.is_none());
    }
}
