//! Backend data sources consumed by the sync loop and the overlay.
//!
//! Both sources are traits so the HTTP client in `twin-backend` can be
//! swapped for scripted fakes in tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use twin_types::{Attributes, ContextKey, EntityId, EntityKind, EntityUpdate};

/// Failure talking to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The request could not be sent or timed out.
    #[error("backend request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response body did not have the expected shape.
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// One snapshot of live factory state.
///
/// Each map is keyed by entity id. A `null` map is treated as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSnapshot {
    /// Robots by id.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub robots: BTreeMap<String, Value>,
    /// Stations by id.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub stations: BTreeMap<String, Value>,
    /// Products by id.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub products: BTreeMap<String, Value>,
    /// Production line overview, when the backend reports one.
    #[serde(default)]
    pub line_status: Option<Value>,
    /// Backend timestamp, passed through untouched.
    #[serde(default)]
    pub timestamp: Option<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl BackendSnapshot {
    /// Number of entities across every kind.
    pub fn entity_count(&self) -> usize {
        self.robots
            .len()
            .saturating_add(self.stations.len())
            .saturating_add(self.products.len())
    }

    /// Entities of one kind.
    pub const fn entities(&self, kind: EntityKind) -> &BTreeMap<String, Value> {
        match kind {
            EntityKind::Robot => &self.robots,
            EntityKind::Station => &self.stations,
            EntityKind::Product => &self.products,
        }
    }

    /// One [`EntityUpdate`] per entity present, robots first.
    ///
    /// Entities with a blank id are skipped. Non-object entity values are
    /// carried as a single `value` attribute.
    pub fn to_updates(&self, timestamp: DateTime<Utc>) -> Vec<EntityUpdate> {
        EntityKind::ALL
            .iter()
            .flat_map(|kind| {
                self.entities(*kind).iter().filter_map(move |(id, value)| {
                    let entity_id = EntityId::new(id.as_str());
                    if entity_id.is_blank() {
                        return None;
                    }
                    Some(EntityUpdate {
                        entity_kind: *kind,
                        entity_id,
                        attributes: attributes_of(value),
                        timestamp,
                    })
                })
            })
            .collect()
    }
}

fn attributes_of(value: &Value) -> Attributes {
    match value {
        Value::Object(fields) => fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Null => Attributes::new(),
        other => Attributes::from([("value".to_owned(), other.clone())]),
    }
}

/// Source of live snapshots scoped to a tenant context.
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current snapshot for `context`.
    fn fetch_snapshot<'a>(
        &'a self,
        context: &'a ContextKey,
    ) -> BoxFuture<'a, Result<BackendSnapshot, SourceError>>;
}

/// Source of full entity detail records shown in the overlay.
pub trait DetailSource: Send + Sync {
    /// Fetch the detail record for one entity.
    fn fetch_detail<'a>(
        &'a self,
        kind: EntityKind,
        id: &'a EntityId,
    ) -> BoxFuture<'a, Result<Value, SourceError>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn null_and_missing_maps_are_empty() {
        let snapshot: BackendSnapshot =
            serde_json::from_value(json!({"robots": null, "timestamp": "2025-09-01T10:00:00"}))
                .unwrap();
        assert_eq!(snapshot.entity_count(), 0);
        assert!(snapshot.line_status.is_none());
    }

    #[test]
    fn updates_cover_every_present_entity() {
        let snapshot: BackendSnapshot = serde_json::from_value(json!({
            "robots": { "R1": { "status": "active" } },
            "stations": { "DoorStation": { "status": "OPERATING", "efficiency": 85.2 } },
            "products": { "CAR_1": "painting", "": { "status": "ghost" } },
            "lineStatus": { "lineId": "LINE_A" }
        }))
        .unwrap();

        let updates = snapshot.to_updates(Utc::now());
        let keys: Vec<(EntityKind, &str)> = updates
            .iter()
            .map(|u| (u.entity_kind, u.entity_id.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (EntityKind::Robot, "R1"),
                (EntityKind::Station, "DoorStation"),
                (EntityKind::Product, "CAR_1"),
            ]
        );
        assert_eq!(updates[2].attributes.get("value"), Some(&json!("painting")));
        assert_eq!(snapshot.line_status, Some(json!({ "lineId": "LINE_A" })));
    }
}
