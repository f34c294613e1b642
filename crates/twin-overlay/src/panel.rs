//! Draggable detail overlay state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use twin_types::{EntityId, EntityKind, ScreenPoint};

/// Detail record lifecycle inside an open overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "status", content = "data", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum DetailState {
    /// The fetch is in flight.
    Loading,
    /// The backend returned the record.
    Ready(Value),
    /// The fetch failed; the message is shown inline with a retry action.
    Failed(String),
}

impl DetailState {
    /// Whether the fetch is still running.
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// The open detail overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct OverlayState {
    /// Kind of the selected entity.
    pub entity_kind: EntityKind,
    /// Id of the selected entity.
    pub entity_id: EntityId,
    /// Top-left corner of the overlay on screen.
    pub position: ScreenPoint,
    /// Detail record state.
    pub detail: DetailState,
    /// Pointer minus position at drag start, while a drag is active.
    #[serde(default)]
    pub grab_offset: Option<ScreenPoint>,
}

impl OverlayState {
    /// A freshly opened overlay waiting for its detail record.
    pub const fn opening(entity_kind: EntityKind, entity_id: EntityId, position: ScreenPoint) -> Self {
        Self {
            entity_kind,
            entity_id,
            position,
            detail: DetailState::Loading,
            grab_offset: None,
        }
    }

    /// Whether a drag is active.
    pub const fn is_dragging(&self) -> bool {
        self.grab_offset.is_some()
    }

    /// Start dragging from `pointer`.
    pub const fn begin_drag(&mut self, pointer: ScreenPoint) {
        self.grab_offset = Some(pointer.relative_to(self.position));
    }

    /// Follow the pointer. Returns `false` when no drag is active.
    pub const fn drag_to(&mut self, pointer: ScreenPoint) -> bool {
        let Some(offset) = self.grab_offset else {
            return false;
        };
        self.position = pointer.relative_to(offset);
        true
    }

    /// Finish dragging. Returns whether a drag was active.
    pub const fn end_drag(&mut self) -> bool {
        self.grab_offset.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drag_keeps_grab_offset() {
        let mut overlay =
            OverlayState::opening(EntityKind::Robot, EntityId::new("R1"), ScreenPoint::new(300.0, 200.0));

        assert!(!overlay.drag_to(ScreenPoint::new(0.0, 0.0)));
        overlay.begin_drag(ScreenPoint::new(310.0, 205.0));
        assert!(overlay.drag_to(ScreenPoint::new(410.0, 305.0)));
        assert_eq!(overlay.position, ScreenPoint::new(400.0, 300.0));

        assert!(overlay.end_drag());
        assert!(!overlay.end_drag());
        assert!(!overlay.drag_to(ScreenPoint::new(0.0, 0.0)));
        assert_eq!(overlay.position, ScreenPoint::new(400.0, 300.0));
    }
}
