//! Correlates engine pointer notifications into overlay state.
//!
//! The correlator owns two mutually exclusive pieces of UI state: a hover
//! tooltip and a draggable detail overlay. Clicks open the overlay and fetch
//! the entity's detail record in the background; every fetch carries a
//! request generation so results for a dismissed or re-targeted overlay are
//! dropped.
//!
//! Every change is published as an [`OverlayView`] on a watch channel.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ts_rs::TS;
use twin_core::bridge::MessageBridge;
use twin_core::registry::SessionRegistry;
use twin_core::sources::DetailSource;
use twin_types::{EntityId, EntityKind, PointerKind, PointerNotification, ScreenPoint};

use crate::coords::{self, Fallback};
use crate::hover::HoverState;
use crate::panel::{DetailState, OverlayState};

/// Everything the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct OverlayView {
    /// Visible tooltip, if any.
    pub hover: Option<HoverState>,
    /// Open overlay, if any.
    pub overlay: Option<OverlayState>,
}

#[derive(Debug, Default)]
struct CorrelatorState {
    view: OverlayView,
    /// Bumped whenever the overlay's target or lifetime changes.
    generation: u64,
}

struct CorrelatorInner {
    details: Arc<dyn DetailSource>,
    registry: Arc<SessionRegistry>,
    fallback: Fallback,
    state: Mutex<CorrelatorState>,
    view_tx: watch::Sender<OverlayView>,
}

/// Hover / overlay state machine. Cheap to clone.
#[derive(Clone)]
pub struct OverlayCorrelator {
    inner: Arc<CorrelatorInner>,
}

impl OverlayCorrelator {
    /// Create a correlator reading surface bounds from `registry`.
    pub fn new(
        details: Arc<dyn DetailSource>,
        registry: Arc<SessionRegistry>,
        fallback: Fallback,
    ) -> Self {
        let (view_tx, _) = watch::channel(OverlayView::default());
        Self {
            inner: Arc::new(CorrelatorInner {
                details,
                registry,
                fallback,
                state: Mutex::new(CorrelatorState::default()),
                view_tx,
            }),
        }
    }

    /// Feed every notification from `bridge` into this correlator.
    pub fn attach(&self, bridge: &MessageBridge) -> JoinHandle<()> {
        let correlator = self.clone();
        bridge.on_notification(move |notification| {
            correlator.handle(notification);
        })
    }

    /// Current view.
    pub fn view(&self) -> OverlayView {
        self.inner.lock().view.clone()
    }

    /// Subscribe to view changes.
    pub fn subscribe(&self) -> watch::Receiver<OverlayView> {
        self.inner.view_tx.subscribe()
    }

    /// Apply one pointer notification.
    ///
    /// Returns the detail fetch task when a click opened the overlay.
    pub fn handle(&self, notification: PointerNotification) -> Option<JoinHandle<()>> {
        match notification.kind {
            PointerKind::HoverEnter => {
                self.hover_enter(notification);
                None
            }
            PointerKind::HoverExit => {
                self.update(|state| state.view.hover.take().is_some());
                None
            }
            PointerKind::Click => self.click(notification),
        }
    }

    /// Close the overlay and forget its detail.
    pub fn dismiss(&self) -> bool {
        self.update(|state| {
            state.generation = state.generation.wrapping_add(1);
            state.view.overlay.take().is_some()
        })
    }

    /// Fetch the open overlay's detail again.
    pub fn retry_detail(&self) -> Option<JoinHandle<()>> {
        let (generation, kind, id) = {
            let mut state = self.inner.lock();
            let overlay = state.view.overlay.as_mut()?;
            if overlay.detail.is_loading() {
                debug!("detail fetch already in flight, retry ignored");
                return None;
            }
            overlay.detail = DetailState::Loading;
            let (kind, id) = (overlay.entity_kind, overlay.entity_id.clone());
            state.generation = state.generation.wrapping_add(1);
            (state.generation, kind, id)
        };
        self.inner.publish();
        info!(entity_kind = %kind, entity_id = %id, "retrying detail fetch");
        Some(self.spawn_fetch(generation, kind, id))
    }

    /// Start dragging the overlay from `pointer`.
    pub fn begin_drag(&self, pointer: ScreenPoint) -> bool {
        self.update(|state| {
            state.view.overlay.as_mut().is_some_and(|overlay| {
                overlay.begin_drag(pointer);
                true
            })
        })
    }

    /// Move the overlay with the pointer.
    pub fn drag_to(&self, pointer: ScreenPoint) -> bool {
        self.update(|state| {
            state
                .view
                .overlay
                .as_mut()
                .is_some_and(|overlay| overlay.drag_to(pointer))
        })
    }

    /// Finish dragging.
    pub fn end_drag(&self) -> bool {
        self.update(|state| {
            state
                .view
                .overlay
                .as_mut()
                .is_some_and(OverlayState::end_drag)
        })
    }

    fn hover_enter(&self, notification: PointerNotification) {
        let anchor = self.anchor(&notification);
        self.update(|state| {
            if state.view.overlay.is_some() {
                debug!("overlay open, hover ignored");
                return false;
            }
            state.view.hover = Some(HoverState {
                entity_kind: notification.entity_kind,
                entity_id: notification.entity_id,
                anchor,
                preview: notification.preview,
            });
            true
        });
    }

    fn click(&self, notification: PointerNotification) -> Option<JoinHandle<()>> {
        let Some(id) = notification.entity_id.clone() else {
            debug!(entity_kind = %notification.entity_kind, "click without entity id ignored");
            return None;
        };
        let kind = notification.entity_kind;
        let position = self.anchor(&notification);

        let generation = {
            let mut state = self.inner.lock();
            state.view.hover = None;
            state.view.overlay = Some(OverlayState::opening(kind, id.clone(), position));
            state.generation = state.generation.wrapping_add(1);
            state.generation
        };
        self.inner.publish();

        info!(entity_kind = %kind, entity_id = %id, "overlay opened");
        Some(self.spawn_fetch(generation, kind, id))
    }

    fn anchor(&self, notification: &PointerNotification) -> ScreenPoint {
        let bounds = self.inner.registry.surface_bounds();
        notification.position.map_or_else(
            || coords::default_anchor(bounds, &self.inner.fallback),
            |position| coords::to_screen(position, bounds, &self.inner.fallback),
        )
    }

    fn spawn_fetch(&self, generation: u64, kind: EntityKind, id: EntityId) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.details.fetch_detail(kind, &id).await;
            let detail = match result {
                Ok(record) => DetailState::Ready(record),
                Err(e) => {
                    warn!(entity_kind = %kind, entity_id = %id, error = %e, "detail fetch failed");
                    DetailState::Failed(e.to_string())
                }
            };

            let applied = {
                let mut guard = inner.lock();
                let state = &mut *guard;
                match state.view.overlay.as_mut() {
                    Some(overlay) if state.generation == generation => {
                        overlay.detail = detail;
                        true
                    }
                    _ => false,
                }
            };
            if applied {
                inner.publish();
            } else {
                debug!(entity_kind = %kind, entity_id = %id, "stale detail result discarded");
            }
        })
    }

    fn update(&self, f: impl FnOnce(&mut CorrelatorState) -> bool) -> bool {
        let changed = f(&mut self.inner.lock());
        if changed {
            self.inner.publish();
        }
        changed
    }
}

impl CorrelatorInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, CorrelatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self) {
        let view = self.lock().view.clone();
        self.view_tx.send_replace(view);
    }
}

impl std::fmt::Debug for OverlayCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayCorrelator")
            .field("view", &self.view())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use twin_core::engine::EngineHandle;
    use twin_core::sources::SourceError;
    use twin_core::surface::{Layout, SharedLayout};
    use twin_core::testing::{RecordingEngine, StaticDetails};
    use twin_types::{Attributes, ContainerId, EnginePosition, Rect};

    use super::*;

    fn correlator(details: StaticDetails) -> (Arc<StaticDetails>, OverlayCorrelator) {
        let layout = Arc::new(SharedLayout::new());
        layout.set(ContainerId::new("canvasA"), Rect::new(100.0, 50.0, 400.0, 300.0));
        let registry = Arc::new(SessionRegistry::new(layout as Arc<dyn Layout>));
        registry.set(
            EngineHandle::new(Arc::new(RecordingEngine::new())),
            &ContainerId::new("canvasA"),
        );
        let details = Arc::new(details);
        let correlator = OverlayCorrelator::new(
            Arc::clone(&details) as Arc<dyn DetailSource>,
            registry,
            Fallback::default(),
        );
        (details, correlator)
    }

    fn notification(kind: PointerKind, id: Option<&str>, x: f64, y: f64) -> PointerNotification {
        PointerNotification {
            kind,
            entity_kind: EntityKind::Robot,
            entity_id: id.map(EntityId::new),
            position: Some(EnginePosition::classify(x, y)),
            preview: Attributes::from([("status".to_owned(), json!("active"))]),
        }
    }

    #[tokio::test]
    async fn click_maps_position_and_loads_detail() {
        let (_, correlator) = correlator(
            StaticDetails::new().with(EntityKind::Robot, "R1", json!({"robotName": "Welder"})),
        );

        let fetch = correlator
            .handle(notification(PointerKind::Click, Some("R1"), 0.5, 0.5))
            .unwrap();
        let overlay = correlator.view().overlay.unwrap();
        assert_eq!(overlay.position, ScreenPoint::new(300.0, 200.0));
        assert_eq!(overlay.detail, DetailState::Loading);

        fetch.await.unwrap();
        assert_eq!(
            correlator.view().overlay.unwrap().detail,
            DetailState::Ready(json!({"robotName": "Welder"}))
        );
    }

    #[tokio::test]
    async fn click_closes_hover() {
        let (_, correlator) = correlator(StaticDetails::new());
        correlator.handle(notification(PointerKind::HoverEnter, Some("R1"), 0.1, 0.1));
        let hover = correlator.view().hover.unwrap();
        assert_eq!(hover.preview.get("status"), Some(&json!("active")));

        let fetch = correlator.handle(notification(PointerKind::Click, Some("R1"), 0.1, 0.1));
        let view = correlator.view();
        assert!(view.hover.is_none());
        assert!(view.overlay.is_some());
        fetch.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn hover_ignored_while_overlay_open() {
        let (_, correlator) = correlator(StaticDetails::new());
        correlator.handle(notification(PointerKind::Click, Some("R1"), 0.5, 0.5));
        correlator.handle(notification(PointerKind::HoverEnter, Some("R2"), 0.2, 0.2));

        let view = correlator.view();
        assert!(view.hover.is_none());
        assert!(view.overlay.is_some());
    }

    #[test]
    fn hover_exit_without_enter_clears() {
        let (_, correlator) = correlator(StaticDetails::new());
        correlator.handle(notification(PointerKind::HoverExit, Some("R1"), 0.0, 0.0));
        assert_eq!(correlator.view(), OverlayView::default());
    }

    #[tokio::test]
    async fn failed_detail_keeps_overlay_until_dismissed() {
        let (details, correlator) = correlator(StaticDetails::new());
        details.fail_with(Some(SourceError::Status { status: 500 }));

        correlator
            .handle(notification(PointerKind::Click, Some("R1"), 0.5, 0.5))
            .unwrap()
            .await
            .unwrap();

        let overlay = correlator.view().overlay.unwrap();
        assert!(matches!(overlay.detail, DetailState::Failed(ref msg) if msg.contains("500")));

        assert!(correlator.dismiss());
        assert!(correlator.view().overlay.is_none());
        assert!(!correlator.dismiss());
    }

    #[tokio::test]
    async fn retry_refetches_failed_detail() {
        let (details, correlator) =
            correlator(StaticDetails::new().with(EntityKind::Robot, "R1", json!({"ok": true})));
        details.fail_with(Some(SourceError::Request("timeout".to_owned())));
        correlator
            .handle(notification(PointerKind::Click, Some("R1"), 0.5, 0.5))
            .unwrap()
            .await
            .unwrap();

        details.fail_with(None);
        correlator.retry_detail().unwrap().await.unwrap();

        assert_eq!(
            correlator.view().overlay.unwrap().detail,
            DetailState::Ready(json!({"ok": true}))
        );
        assert_eq!(details.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_result_is_discarded_after_dismiss() {
        let (_, correlator) = correlator(
            StaticDetails::new()
                .with_delay(Duration::from_millis(200))
                .with(EntityKind::Robot, "R1", json!({"ok": true})),
        );
        let fetch = correlator
            .handle(notification(PointerKind::Click, Some("R1"), 0.5, 0.5))
            .unwrap();
        correlator.dismiss();
        fetch.await.unwrap();

        assert!(correlator.view().overlay.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retargeted_overlay_ignores_old_result() {
        let (_, correlator) = correlator(
            StaticDetails::new()
                .with_delay(Duration::from_millis(200))
                .with(EntityKind::Robot, "R1", json!({"id": "R1"}))
                .with(EntityKind::Robot, "R2", json!({"id": "R2"})),
        );
        let first = correlator
            .handle(notification(PointerKind::Click, Some("R1"), 0.5, 0.5))
            .unwrap();
        let second = correlator
            .handle(notification(PointerKind::Click, Some("R2"), 0.5, 0.5))
            .unwrap();
        first.await.unwrap();
        assert_eq!(correlator.view().overlay.unwrap().detail, DetailState::Loading);

        second.await.unwrap();
        assert_eq!(
            correlator.view().overlay.unwrap().detail,
            DetailState::Ready(json!({"id": "R2"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dragging_does_not_refetch() {
        let (details, correlator) = correlator(StaticDetails::new().with_delay(Duration::from_millis(50)));
        let fetch = correlator
            .handle(notification(PointerKind::Click, Some("R1"), 0.5, 0.5))
            .unwrap();

        assert!(correlator.begin_drag(ScreenPoint::new(310.0, 210.0)));
        assert!(correlator.drag_to(ScreenPoint::new(510.0, 410.0)));
        assert!(correlator.end_drag());
        fetch.await.unwrap();

        let overlay = correlator.view().overlay.unwrap();
        assert_eq!(overlay.position, ScreenPoint::new(500.0, 400.0));
        assert!(!overlay.is_dragging());
        assert_eq!(details.calls(), 1);
    }

    #[tokio::test]
    async fn view_changes_are_published() {
        let (_, correlator) = correlator(StaticDetails::new());
        let mut rx = correlator.subscribe();
        correlator.handle(notification(PointerKind::HoverEnter, Some("R1"), 0.5, 0.5));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().hover.is_some());
    }
}
