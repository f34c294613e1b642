//! Parsing of engine → host pointer notifications.
//!
//! Two envelopes reach the host:
//!
//! - canonical: `{ "kind": "click", "entityKind": "robot", "entityId": "R1",
//!   "position": { "x": 0.5, "y": 0.5 } }`
//! - legacy: `{ "type": "robotClicked", "payload": { "robotId": "R1", ... } }`
//!
//! Both produce the same [`PointerNotification`]. Fields that are not part of
//! the envelope are kept as hover preview data.

use serde_json::{Map, Value};
use twin_types::{Attributes, EnginePosition, EntityId, EntityKind, PointerKind, PointerNotification};

/// Keys that may carry the entity id, in lookup order.
const ID_KEYS: &[&str] = &[
    "entityId",
    "id",
    "robotId",
    "stationCode",
    "stationId",
    "productId",
    "carId",
];

/// Envelope keys that never end up in the preview.
const ENVELOPE_KEYS: &[&str] = &["kind", "entityKind", "position", "preview", "x", "y"];

/// Legacy event-type suffixes and the pointer kind they encode.
const LEGACY_SUFFIXES: &[(&str, PointerKind)] = &[
    ("clicked", PointerKind::Click),
    ("click", PointerKind::Click),
    ("hoverenter", PointerKind::HoverEnter),
    ("hoverexit", PointerKind::HoverExit),
    ("hoverleave", PointerKind::HoverExit),
    ("hover", PointerKind::HoverEnter),
];

/// Why a notification was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationParseError {
    /// The payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The payload is JSON but not an object.
    #[error("notification must be a JSON object")]
    NotAnObject,

    /// No pointer kind could be determined.
    #[error("missing pointer kind")]
    MissingPointerKind,

    /// The pointer kind is not one the host understands.
    #[error("unknown pointer kind `{0}`")]
    UnknownPointerKind(String),

    /// `entityKind` is absent.
    #[error("missing entityKind")]
    MissingEntityKind,

    /// `entityKind` is not robot, station or product.
    #[error("unknown entityKind `{0}`")]
    UnknownEntityKind(String),

    /// A legacy `type` that does not describe a pointer event.
    #[error("unsupported event type `{0}`")]
    UnsupportedType(String),

    /// Neither an entity id nor a position was supplied.
    #[error("notification carries neither entityId nor position")]
    MissingTarget,

    /// The position is present but not a pair of finite numbers.
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

/// Parse a raw JSON notification in either envelope.
///
/// # Errors
///
/// Returns a [`NotificationParseError`] describing the first problem found.
pub fn parse(raw: &str) -> Result<PointerNotification, NotificationParseError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| NotificationParseError::InvalidJson(e.to_string()))?;
    parse_value(value)
}

/// Parse an already decoded notification in either envelope.
///
/// # Errors
///
/// Returns a [`NotificationParseError`] describing the first problem found.
pub fn parse_value(value: Value) -> Result<PointerNotification, NotificationParseError> {
    let Value::Object(mut object) = value else {
        return Err(NotificationParseError::NotAnObject);
    };

    if let Some(Value::String(event_type)) = object.remove("type") {
        let (entity_kind, kind) = parse_legacy_type(&event_type)?;
        let body = match object.remove("payload") {
            Some(Value::Object(payload)) => payload,
            Some(Value::Null) | None => object,
            Some(other) => {
                // A bare scalar payload is the entity id.
                let mut body = Map::new();
                body.insert("entityId".to_owned(), other);
                body
            }
        };
        return build(kind, entity_kind, body);
    }

    let kind = match object.get("kind") {
        Some(Value::String(s)) => {
            PointerKind::parse(s).ok_or_else(|| NotificationParseError::UnknownPointerKind(s.clone()))?
        }
        _ => return Err(NotificationParseError::MissingPointerKind),
    };
    let entity_kind = entity_kind_field(&object)?;
    build(kind, entity_kind, object)
}

/// Parse the payload of a dedicated per-kind entry point.
///
/// The entity kind is fixed by the entry point; the pointer kind defaults to
/// a click. A bare string or number is taken as the entity id.
///
/// # Errors
///
/// Returns a [`NotificationParseError`] if the payload carries no target.
pub fn parse_for_kind(
    entity_kind: EntityKind,
    payload: Value,
) -> Result<PointerNotification, NotificationParseError> {
    let object = match payload {
        Value::Object(object) => object,
        Value::Null => Map::new(),
        other => {
            let mut object = Map::new();
            object.insert("entityId".to_owned(), other);
            object
        }
    };
    let kind = match object.get("kind") {
        Some(Value::String(s)) => {
            PointerKind::parse(s).ok_or_else(|| NotificationParseError::UnknownPointerKind(s.clone()))?
        }
        _ => PointerKind::Click,
    };
    build(kind, entity_kind, object)
}

fn parse_legacy_type(event_type: &str) -> Result<(EntityKind, PointerKind), NotificationParseError> {
    let lowered = event_type.to_ascii_lowercase();
    for (suffix, kind) in LEGACY_SUFFIXES {
        if let Some(entity_kind) = lowered.strip_suffix(suffix).and_then(EntityKind::parse) {
            return Ok((entity_kind, *kind));
        }
    }
    Err(NotificationParseError::UnsupportedType(event_type.to_owned()))
}

fn entity_kind_field(object: &Map<String, Value>) -> Result<EntityKind, NotificationParseError> {
    match object.get("entityKind") {
        Some(Value::String(s)) => {
            EntityKind::parse(s).ok_or_else(|| NotificationParseError::UnknownEntityKind(s.clone()))
        }
        Some(other) => Err(NotificationParseError::UnknownEntityKind(other.to_string())),
        None => Err(NotificationParseError::MissingEntityKind),
    }
}

fn build(
    kind: PointerKind,
    entity_kind: EntityKind,
    mut body: Map<String, Value>,
) -> Result<PointerNotification, NotificationParseError> {
    let entity_id = take_entity_id(&mut body);
    let position = take_position(&body)?;

    if entity_id.is_none() && position.is_none() {
        return Err(NotificationParseError::MissingTarget);
    }

    let explicit_preview = match body.remove("preview") {
        Some(Value::Object(preview)) => Some(preview),
        _ => None,
    };
    let mut preview: Attributes = body
        .into_iter()
        .filter(|(key, _)| !ENVELOPE_KEYS.contains(&key.as_str()))
        .collect();
    if let Some(explicit) = explicit_preview {
        preview.extend(explicit);
    }

    Ok(PointerNotification {
        kind,
        entity_kind,
        entity_id,
        position,
        preview,
    })
}

fn take_entity_id(body: &mut Map<String, Value>) -> Option<EntityId> {
    for key in ID_KEYS {
        let id = match body.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_owned(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        body.remove(*key);
        return Some(EntityId::new(id));
    }
    None
}

fn take_position(body: &Map<String, Value>) -> Result<Option<EnginePosition>, NotificationParseError> {
    if let Some(position) = body.get("position") {
        return match position {
            Value::Null => Ok(None),
            Value::Object(fields) => {
                let x = number(fields.get("x"), "x")?;
                let y = number(fields.get("y"), "y")?;
                let space = fields.get("space").and_then(Value::as_str);
                Ok(Some(positioned(space, x, y)?))
            }
            Value::Array(items) if items.len() == 2 => {
                let x = number(items.first(), "x")?;
                let y = number(items.get(1), "y")?;
                Ok(Some(EnginePosition::classify(x, y)))
            }
            other => Err(NotificationParseError::InvalidPosition(other.to_string())),
        };
    }

    match (body.get("x"), body.get("y")) {
        (None, None) => Ok(None),
        (x, y) => {
            let x = number(x, "x")?;
            let y = number(y, "y")?;
            Ok(Some(EnginePosition::classify(x, y)))
        }
    }
}

fn positioned(space: Option<&str>, x: f64, y: f64) -> Result<EnginePosition, NotificationParseError> {
    match space.map(str::to_ascii_lowercase).as_deref() {
        None => Ok(EnginePosition::classify(x, y)),
        Some("normalized" | "viewport") => Ok(EnginePosition::Normalized { x, y }),
        Some("pixels" | "pixel" | "px") => Ok(EnginePosition::Pixels { x, y }),
        Some(other) => Err(NotificationParseError::InvalidPosition(format!(
            "unknown coordinate space `{other}`"
        ))),
    }
}

fn number(value: Option<&Value>, axis: &str) -> Result<f64, NotificationParseError> {
    value
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
        .ok_or_else(|| NotificationParseError::InvalidPosition(format!("`{axis}` is not a number")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_click() {
        let n = parse(
            r#"{"kind":"click","entityKind":"robot","entityId":"R1","position":{"x":0.5,"y":0.5}}"#,
        )
        .unwrap();
        assert_eq!(n.kind, PointerKind::Click);
        assert_eq!(n.entity_kind, EntityKind::Robot);
        assert_eq!(n.entity_id, Some(EntityId::new("R1")));
        assert_eq!(n.position, Some(EnginePosition::Normalized { x: 0.5, y: 0.5 }));
        assert!(n.preview.is_empty());
    }

    #[test]
    fn canonical_hover_keeps_preview_fields() {
        let n = parse_value(json!({
            "kind": "hoverEnter",
            "entityKind": "station",
            "entityId": "DoorStation",
            "position": { "x": 640, "y": 360 },
            "status": "OPERATING",
            "efficiency": 85.2
        }))
        .unwrap();
        assert_eq!(n.kind, PointerKind::HoverEnter);
        assert_eq!(n.position, Some(EnginePosition::Pixels { x: 640.0, y: 360.0 }));
        assert_eq!(n.preview.get("status"), Some(&json!("OPERATING")));
        assert_eq!(n.preview.len(), 2);
    }

    #[test]
    fn explicit_space_wins_over_classification() {
        let n = parse_value(json!({
            "kind": "click",
            "entityKind": "robot",
            "position": { "space": "pixels", "x": 1, "y": 1 }
        }))
        .unwrap();
        assert_eq!(n.position, Some(EnginePosition::Pixels { x: 1.0, y: 1.0 }));
        assert!(n.entity_id.is_none());
    }

    #[test]
    fn legacy_envelope_with_aliases() {
        let n = parse(r#"{"type":"processClicked","payload":{"stationCode":"WaterLeakTestStation"}}"#)
            .unwrap();
        assert_eq!(n.kind, PointerKind::Click);
        assert_eq!(n.entity_kind, EntityKind::Station);
        assert_eq!(n.entity_id, Some(EntityId::new("WaterLeakTestStation")));

        let n = parse(r#"{"type":"robotHoverExit","payload":{"robotId":7}}"#).unwrap();
        assert_eq!(n.kind, PointerKind::HoverExit);
        assert_eq!(n.entity_id, Some(EntityId::new("7")));

        let n = parse(r#"{"type":"productClicked","payload":"CAR_001"}"#).unwrap();
        assert_eq!(n.entity_kind, EntityKind::Product);
        assert_eq!(n.entity_id, Some(EntityId::new("CAR_001")));
    }

    #[test]
    fn legacy_non_pointer_event_is_rejected() {
        assert_eq!(
            parse(r#"{"type":"statusUpdate","payload":{}}"#),
            Err(NotificationParseError::UnsupportedType("statusUpdate".to_owned()))
        );
    }

    #[test]
    fn missing_entity_kind_is_rejected() {
        assert_eq!(
            parse(r#"{"kind":"click","entityId":"R1"}"#),
            Err(NotificationParseError::MissingEntityKind)
        );
        assert_eq!(
            parse(r#"{"kind":"click","entityKind":"forklift","entityId":"F1"}"#),
            Err(NotificationParseError::UnknownEntityKind("forklift".to_owned()))
        );
    }

    #[test]
    fn missing_target_is_rejected() {
        assert_eq!(
            parse(r#"{"kind":"click","entityKind":"robot","entityId":"  "}"#),
            Err(NotificationParseError::MissingTarget)
        );
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(parse("{not json"), Err(NotificationParseError::InvalidJson(_))));
        assert_eq!(parse("[1,2]"), Err(NotificationParseError::NotAnObject));
        assert!(matches!(
            parse(r#"{"kind":"click","entityKind":"robot","position":{"x":"a","y":1}}"#),
            Err(NotificationParseError::InvalidPosition(_))
        ));
    }

    #[test]
    fn dedicated_entry_defaults_to_click() {
        let n = parse_for_kind(EntityKind::Robot, json!({"robotId": "R2", "x": 0.1, "y": 0.9}))
            .unwrap();
        assert_eq!(n.kind, PointerKind::Click);
        assert_eq!(n.entity_id, Some(EntityId::new("R2")));
        assert_eq!(n.position, Some(EnginePosition::Normalized { x: 0.1, y: 0.9 }));

        let n = parse_for_kind(EntityKind::Product, json!("CAR_7")).unwrap();
        assert_eq!(n.entity_id, Some(EntityId::new("CAR_7")));
    }
}
