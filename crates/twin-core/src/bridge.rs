//! Two-way message bridge between the host and the engine.
//!
//! Outbound, the bridge turns typed host commands into
//! [`OutboundMessage`]s addressed to the engine's command receiver and hands
//! them to the live instance synchronously, so calls reach the engine in call
//! order. Delivery is fire-and-forget: a missing engine or a rejected message
//! is logged and reported as `false`.
//!
//! Inbound, the engine calls into an [`InboundPort`]. Every entry point
//! converges on [`inbound::parse_value`](crate::inbound::parse_value) and one
//! broadcast channel. Notifications nobody is subscribed to are dropped.
//!
//! The bridge also owns the active context key (the tenant whose data is
//! shown) so it can be replayed to a freshly loaded engine.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use twin_types::{ContextKey, EntityId, EntityKind, EntityUpdate, PointerNotification};

use crate::inbound::{self, NotificationParseError};
use crate::lock;
use crate::registry::SessionRegistry;

/// Capacity of the notification broadcast channel.
const NOTIFICATION_CAPACITY: usize = 256;

/// Engine-side methods the host can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Tell the engine which tenant's data it is showing.
    SetContext,
    /// Push one robot's state.
    RobotStatus,
    /// Push one station's state.
    StationStatus,
    /// Push one product's state.
    ProductStatus,
    /// Push the production line overview.
    ProductionData,
    /// Highlight an entity in the scene.
    HighlightEntity,
}

impl Channel {
    /// Method name on the engine's command receiver.
    pub const fn method(self) -> &'static str {
        match self {
            Self::SetContext => "SetContext",
            Self::RobotStatus => "UpdateRobotStatus",
            Self::StationStatus => "UpdateStationStatus",
            Self::ProductStatus => "UpdateProductStatus",
            Self::ProductionData => "UpdateProductionData",
            Self::HighlightEntity => "HighlightEntity",
        }
    }

    /// Status channel for an entity kind.
    pub const fn for_entity(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Robot => Self::RobotStatus,
            EntityKind::Station => Self::StationStatus,
            EntityKind::Product => Self::ProductStatus,
        }
    }
}

/// One command as handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Receiving object inside the engine.
    pub target: String,
    /// Method to invoke on the receiver.
    pub method: String,
    /// JSON-encoded argument.
    pub payload: String,
}

/// Payload of [`Channel::SetContext`].
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextPayload<'a> {
    context_key: &'a str,
}

/// Payload of [`Channel::HighlightEntity`].
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HighlightPayload<'a> {
    entity_kind: EntityKind,
    entity_id: &'a str,
}

/// Host side of the host ↔ engine channel.
pub struct MessageBridge {
    registry: Arc<SessionRegistry>,
    target: String,
    notifications: broadcast::Sender<PointerNotification>,
    context: RwLock<Option<ContextKey>>,
}

impl MessageBridge {
    /// Create a bridge delivering to the engine receiver named `target`.
    pub fn new(registry: Arc<SessionRegistry>, target: impl Into<String>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            registry,
            target: target.into(),
            notifications,
            context: RwLock::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Serialize `payload` and deliver it on `channel`.
    ///
    /// Returns whether the engine accepted the message.
    pub fn send<T: Serialize + ?Sized>(&self, channel: Channel, payload: &T) -> bool {
        let payload = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(method = channel.method(), error = %e, "failed to encode engine payload");
                return false;
            }
        };
        self.deliver(channel, payload)
    }

    /// Push one entity update on its kind's status channel.
    pub fn send_update(&self, update: &EntityUpdate) -> bool {
        self.send(Channel::for_entity(update.entity_kind), update)
    }

    /// Push the production line overview.
    pub fn send_production_data(&self, line_status: &Value) -> bool {
        self.send(Channel::ProductionData, line_status)
    }

    /// Ask the engine to highlight an entity.
    pub fn highlight(&self, kind: EntityKind, id: &EntityId) -> bool {
        self.send(
            Channel::HighlightEntity,
            &HighlightPayload {
                entity_kind: kind,
                entity_id: id.as_str(),
            },
        )
    }

    /// Make `key` the active context and tell the engine.
    ///
    /// The key is stored even when no engine is loaded; it is replayed after
    /// the next successful load.
    pub fn set_context(&self, key: ContextKey) -> bool {
        let changed = {
            let mut context = lock::write(&self.context);
            let changed = context.as_ref() != Some(&key);
            *context = Some(key.clone());
            changed
        };
        if changed {
            info!(context = %key, "active context changed");
        }
        self.send_context(&key)
    }

    /// Re-send the active context, if one is set.
    pub fn replay_context(&self) -> bool {
        let Some(key) = self.context() else {
            return false;
        };
        self.send_context(&key)
    }

    /// The active context key.
    pub fn context(&self) -> Option<ContextKey> {
        lock::read(&self.context).clone()
    }

    fn send_context(&self, key: &ContextKey) -> bool {
        self.send(
            Channel::SetContext,
            &ContextPayload {
                context_key: key.as_str(),
            },
        )
    }

    fn deliver(&self, channel: Channel, payload: String) -> bool {
        let Some(handle) = self.registry.get() else {
            debug!(method = channel.method(), "no engine loaded, message dropped");
            return false;
        };
        let message = OutboundMessage {
            target: self.target.clone(),
            method: channel.method().to_owned(),
            payload,
        };
        match handle.instance().deliver(&message) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    session = %handle.id(),
                    method = channel.method(),
                    error = %e,
                    "engine delivery failed"
                );
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Entry points to install into an engine instance.
    pub fn inbound_port(&self) -> InboundPort {
        InboundPort {
            notifications: self.notifications.clone(),
        }
    }

    /// Subscribe to validated pointer notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PointerNotification> {
        self.notifications.subscribe()
    }

    /// Run `handler` for every notification on a spawned task.
    ///
    /// The subscription is taken before this returns, so notifications
    /// emitted afterwards are never missed. Abort the returned handle to
    /// unsubscribe.
    pub fn on_notification<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(PointerNotification) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => handler(notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification handler lagged, notifications skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for MessageBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBridge")
            .field("target", &self.target)
            .field("context", &self.context())
            .finish_non_exhaustive()
    }
}

/// Entry points the engine calls to notify the host.
///
/// Cheap to clone; every clone feeds the same subscribers.
#[derive(Debug, Clone)]
pub struct InboundPort {
    notifications: broadcast::Sender<PointerNotification>,
}

impl InboundPort {
    /// Generic entry point taking a raw JSON notification.
    ///
    /// # Errors
    ///
    /// Returns the parse error for a malformed payload (after logging it).
    pub fn notify(&self, raw: &str) -> Result<(), NotificationParseError> {
        self.accept(inbound::parse(raw))
    }

    /// Generic entry point taking decoded JSON.
    ///
    /// # Errors
    ///
    /// Returns the parse error for a malformed payload (after logging it).
    pub fn notify_value(&self, value: Value) -> Result<(), NotificationParseError> {
        self.accept(inbound::parse_value(value))
    }

    /// Dedicated entry point for robot clicks.
    ///
    /// # Errors
    ///
    /// Returns the parse error for a malformed payload (after logging it).
    pub fn robot_clicked(&self, payload: Value) -> Result<(), NotificationParseError> {
        self.accept(inbound::parse_for_kind(EntityKind::Robot, payload))
    }

    /// Dedicated entry point for station clicks.
    ///
    /// # Errors
    ///
    /// Returns the parse error for a malformed payload (after logging it).
    pub fn station_clicked(&self, payload: Value) -> Result<(), NotificationParseError> {
        self.accept(inbound::parse_for_kind(EntityKind::Station, payload))
    }

    /// Dedicated entry point for product clicks.
    ///
    /// # Errors
    ///
    /// Returns the parse error for a malformed payload (after logging it).
    pub fn product_clicked(&self, payload: Value) -> Result<(), NotificationParseError> {
        self.accept(inbound::parse_for_kind(EntityKind::Product, payload))
    }

    fn accept(
        &self,
        parsed: Result<PointerNotification, NotificationParseError>,
    ) -> Result<(), NotificationParseError> {
        let notification = parsed.inspect_err(|e| {
            warn!(error = %e, "dropping malformed engine notification");
        })?;
        let kind = notification.kind;
        let entity_kind = notification.entity_kind;
        if self.notifications.send(notification).is_err() {
            debug!(?kind, %entity_kind, "no notification subscribers, dropped");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;
    use twin_types::{ContainerId, PointerKind, Rect};

    use super::*;
    use crate::engine::EngineHandle;
    use crate::surface::{Layout, SharedLayout};
    use crate::testing::RecordingEngine;

    fn bridge() -> (Arc<SessionRegistry>, MessageBridge) {
        let layout = Arc::new(SharedLayout::new());
        layout.set(ContainerId::new("canvasA"), Rect::new(0.0, 0.0, 800.0, 600.0));
        let registry = Arc::new(SessionRegistry::new(layout as Arc<dyn Layout>));
        let bridge = MessageBridge::new(Arc::clone(&registry), "GameManager");
        (registry, bridge)
    }

    fn load(registry: &SessionRegistry) -> Arc<RecordingEngine> {
        let engine = Arc::new(RecordingEngine::new());
        registry.set(EngineHandle::new(Arc::clone(&engine) as _), &ContainerId::new("canvasA"));
        engine
    }

    fn update(kind: EntityKind, id: &str, status: &str) -> EntityUpdate {
        let mut attributes = BTreeMap::new();
        attributes.insert("status".to_owned(), json!(status));
        EntityUpdate {
            entity_kind: kind,
            entity_id: EntityId::new(id),
            attributes,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn send_without_engine_is_dropped() {
        let (_, bridge) = bridge();
        assert!(!bridge.send_update(&update(EntityKind::Robot, "R1", "active")));
    }

    #[test]
    fn updates_are_delivered_in_call_order() {
        let (registry, bridge) = bridge();
        let engine = load(&registry);

        for status in ["idle", "active", "error"] {
            assert!(bridge.send_update(&update(EntityKind::Robot, "R1", status)));
        }

        let statuses: Vec<String> = engine
            .delivered()
            .iter()
            .map(|m| {
                assert_eq!(m.target, "GameManager");
                assert_eq!(m.method, "UpdateRobotStatus");
                let value: Value = serde_json::from_str(&m.payload).unwrap();
                value["attributes"]["status"].as_str().unwrap().to_owned()
            })
            .collect();
        assert_eq!(statuses, vec!["idle", "active", "error"]);
    }

    #[test]
    fn delivery_failure_reports_false() {
        let (registry, bridge) = bridge();
        let engine = load(&registry);
        engine.set_fail_delivery(true);
        assert!(!bridge.send_update(&update(EntityKind::Station, "S1", "down")));
    }

    #[test]
    fn context_is_stored_and_replayed() {
        let (registry, bridge) = bridge();
        assert!(!bridge.set_context(ContextKey::new("1")));
        assert_eq!(bridge.context(), Some(ContextKey::new("1")));

        let engine = load(&registry);
        assert!(bridge.replay_context());
        let delivered = engine.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].method, "SetContext");
        assert_eq!(delivered[0].payload, r#"{"contextKey":"1"}"#);
    }

    #[test]
    fn highlight_uses_highlight_channel() {
        let (registry, bridge) = bridge();
        let engine = load(&registry);
        assert!(bridge.highlight(EntityKind::Station, &EntityId::new("DoorStation")));
        assert_eq!(engine.methods(), vec!["HighlightEntity"]);
    }

    #[tokio::test]
    async fn generic_and_dedicated_entry_points_converge() {
        let (_, bridge) = bridge();
        let mut rx = bridge.subscribe();
        let port = bridge.inbound_port();

        port.notify(r#"{"kind":"click","entityKind":"robot","entityId":"R1"}"#)
            .unwrap();
        port.robot_clicked(json!({"robotId": "R1"})).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.kind, PointerKind::Click);
    }

    #[tokio::test]
    async fn malformed_notifications_are_not_delivered() {
        let (_, bridge) = bridge();
        let mut rx = bridge.subscribe();
        let port = bridge.inbound_port();

        assert!(port.notify("not json").is_err());
        assert!(port.notify_value(json!({"kind": "click"})).is_err());
        port.station_clicked(json!("DoorStation")).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.entity_kind, EntityKind::Station);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn notifications_without_subscribers_are_dropped() {
        let (_, bridge) = bridge();
        let port = bridge.inbound_port();
        assert!(port.product_clicked(json!({"carId": "CAR_1"})).is_ok());

        let mut late = bridge.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn on_notification_runs_handler() {
        let (_, bridge) = bridge();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let task = bridge.on_notification(move |n| {
            let _ = tx.send(n.entity_id);
        });

        bridge
            .inbound_port()
            .product_clicked(json!({"productId": "P9"}))
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), Some(EntityId::new("P9")));
        task.abort();
    }
}
