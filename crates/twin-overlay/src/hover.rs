//! Hover tooltip state.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use twin_types::{Attributes, EntityId, EntityKind, ScreenPoint};

/// A tooltip anchored next to the entity under the pointer.
///
/// Its content comes straight from the hover notification; showing it never
/// touches the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct HoverState {
    /// Kind of the hovered entity.
    pub entity_kind: EntityKind,
    /// Id of the hovered entity, when the engine reported one.
    pub entity_id: Option<EntityId>,
    /// Screen anchor of the tooltip.
    pub anchor: ScreenPoint,
    /// Preview fields carried by the notification.
    pub preview: Attributes,
}
