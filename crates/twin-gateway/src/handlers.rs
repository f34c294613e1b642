//! REST endpoint handlers for the gateway.
//!
//! Two audiences share this module: the page (session, layout, sync and
//! overlay controls under `/api`) and the engine runtime (notification
//! entry points and artifact downloads under `/engine`).

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use twin_core::bridge::InboundPort;
use twin_core::engine::ArtifactRole;
use twin_core::registry::Reattach;
use twin_types::{ContainerId, ContextKey, EntityId, EntityKind, Rect, ScreenPoint};

use crate::error::GatewayError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

/// Body naming a layout container. Missing means the configured default.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceRequest {
    /// Target container id.
    #[serde(default)]
    pub surface_id: Option<String>,
}

/// Body of `POST /api/session/visibility`.
#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    /// Whether the page became visible.
    pub visible: bool,
}

/// Body of `POST /api/sync/start`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStartRequest {
    /// Context to poll. Defaults to the active context, then the
    /// configured one.
    #[serde(default)]
    pub context_key: Option<String>,
    /// Poll interval in milliseconds.
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

/// Body of `POST /api/context`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRequest {
    /// New active context key.
    pub context_key: String,
}

/// Body of `POST /api/highlight`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRequest {
    /// Entity kind (`robot`, `station`, `product`).
    pub entity_kind: String,
    /// Backend id of the entity.
    pub entity_id: String,
}

/// State of the synchronization loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Whether a polling session is running.
    pub running: bool,
    /// Context of the running session.
    pub context_key: Option<ContextKey>,
    /// Interval of the running session.
    pub interval_ms: Option<u64>,
}

fn sync_status(state: &AppState) -> SyncStatus {
    SyncStatus {
        running: state.sync.is_running(),
        context_key: state.sync.context(),
        interval_ms: state
            .sync
            .interval()
            .map(|i| u64::try_from(i.as_millis()).unwrap_or(u64::MAX)),
    }
}

// ---------------------------------------------------------------------------
// GET /
// ---------------------------------------------------------------------------

/// Plain status page.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.registry.status();
    let context = state
        .bridge
        .context()
        .map_or_else(|| "none".to_owned(), |c| c.to_string());
    let surface = status
        .surface
        .as_ref()
        .map_or_else(|| "detached".to_owned(), ToString::to_string);

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Factory Twin Gateway</title>
</head>
<body>
    <h1>Factory Twin Gateway</h1>
    <table>
        <tr><td>Engine</td><td>{:?} ({:.0}%)</td></tr>
        <tr><td>Surface</td><td>{surface}</td></tr>
        <tr><td>Context</td><td>{context}</td></tr>
        <tr><td>Sync</td><td>{}</td></tr>
        <tr><td>Engine sockets</td><td>{}</td></tr>
    </table>
</body>
</html>"#,
        status.load_state,
        status.progress,
        if state.sync.is_running() { "running" } else { "stopped" },
        state.link.receiver_count(),
    ))
}

/// `GET /api/health`
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// `GET /api/session`
pub async fn get_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.status())
}

/// Load the engine into the requested container, or join a load already
/// in flight. Responds once the load settles.
pub async fn load_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SurfaceRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let surface = state.surface_or_default(body.surface_id.as_deref());
    state.loader.request_load(&surface).await?;
    Ok(Json(state.registry.status()))
}

/// Retry after a failed load, into the last requested container.
pub async fn retry_session(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, GatewayError> {
    let surface = state
        .loader
        .last_surface()
        .unwrap_or_else(|| state.defaults.surface.clone());
    state.loader.retry(&surface).await?;
    Ok(Json(state.registry.status()))
}

/// Continue without an engine after a failure.
pub async fn skip_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let skipped = state.loader.continue_without_engine();
    Json(serde_json::json!({
        "skipped": skipped,
        "session": state.registry.status(),
    }))
}

/// Move the display surface into another container.
pub async fn reattach_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SurfaceRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let target = state.surface_or_default(body.surface_id.as_deref());
    let body = match state.registry.reattach(&target)? {
        Reattach::Unchanged => serde_json::json!({ "moved": false }),
        Reattach::Moved { bounds } => serde_json::json!({ "moved": true, "bounds": bounds }),
    };
    Ok(Json(body))
}

/// Report a page visibility change.
pub async fn set_visibility(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VisibilityRequest>,
) -> impl IntoResponse {
    let resumed = state.registry.on_visibility_change(body.visible);
    Json(serde_json::json!({ "resumed": resumed }))
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Publish a container's bounds.
pub async fn put_layout(
    State(state): State<Arc<AppState>>,
    Path(container): Path<String>,
    Json(bounds): Json<Rect>,
) -> Result<impl IntoResponse, GatewayError> {
    let container = ContainerId::new(container);
    if container.is_blank() {
        return Err(GatewayError::InvalidRequest("container id is blank".to_owned()));
    }
    let finite = [bounds.left, bounds.top, bounds.width, bounds.height]
        .iter()
        .all(|v| v.is_finite());
    if !finite || bounds.width < 0.0 || bounds.height < 0.0 {
        return Err(GatewayError::InvalidRequest(
            "bounds must be finite with non-negative size".to_owned(),
        ));
    }
    state.layout.set(container, bounds);
    Ok(StatusCode::NO_CONTENT)
}

/// Remove a container from the page layout.
pub async fn delete_layout(
    State(state): State<Arc<AppState>>,
    Path(container): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let container = ContainerId::new(container);
    state
        .layout
        .remove(&container)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| GatewayError::NotFound(format!("container `{container}`")))
}

// ---------------------------------------------------------------------------
// Synchronization
// ---------------------------------------------------------------------------

/// `GET /api/sync`
pub async fn get_sync(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(sync_status(&state))
}

/// Start (or restart) polling.
pub async fn start_sync(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SyncStartRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let context = body
        .context_key
        .map(ContextKey::new)
        .or_else(|| state.bridge.context())
        .unwrap_or_else(|| state.defaults.context.clone());
    let interval = body
        .interval_ms
        .map_or(state.defaults.sync_interval, Duration::from_millis);

    state.sync.start(context, interval)?;
    Ok(Json(sync_status(&state)))
}

/// Stop polling. Idempotent.
pub async fn stop_sync(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stopped = state.sync.stop();
    Json(serde_json::json!({ "stopped": stopped }))
}

/// Change the active context. A running poll follows the new context.
pub async fn set_context(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ContextRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let key = ContextKey::new(body.context_key);
    if key.is_blank() {
        return Err(GatewayError::InvalidRequest("contextKey is blank".to_owned()));
    }

    let delivered = state.bridge.set_context(key.clone());

    let mut restarted = false;
    if state.sync.is_running() && state.sync.context().as_ref() != Some(&key) {
        let interval = state.sync.interval().unwrap_or(state.defaults.sync_interval);
        state.sync.start(key.clone(), interval)?;
        restarted = true;
    }

    Ok(Json(serde_json::json!({
        "contextKey": key,
        "delivered": delivered,
        "syncRestarted": restarted,
    })))
}

/// Ask the engine to highlight an entity.
pub async fn highlight(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HighlightRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let kind = EntityKind::parse(&body.entity_kind).ok_or_else(|| {
        GatewayError::InvalidRequest(format!("unknown entityKind `{}`", body.entity_kind))
    })?;
    let id = EntityId::new(body.entity_id);
    if id.is_blank() {
        return Err(GatewayError::InvalidRequest("entityId is blank".to_owned()));
    }
    if !state.registry.is_loaded() {
        return Err(GatewayError::NotLoaded);
    }

    let delivered = state.bridge.highlight(kind, &id);
    Ok(Json(serde_json::json!({ "delivered": delivered })))
}

// ---------------------------------------------------------------------------
// Overlay
// ---------------------------------------------------------------------------

/// `GET /api/overlay`
pub async fn get_overlay(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.correlator.view())
}

/// Close the detail overlay.
pub async fn dismiss_overlay(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "dismissed": state.correlator.dismiss() }))
}

/// Re-fetch the open overlay's detail record.
pub async fn retry_overlay(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let retrying = state.correlator.retry_detail().is_some();
    Json(serde_json::json!({ "retrying": retrying }))
}

/// `POST /api/overlay/drag/begin`
pub async fn drag_begin(
    State(state): State<Arc<AppState>>,
    Json(pointer): Json<ScreenPoint>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "dragging": state.correlator.begin_drag(pointer) }))
}

/// `POST /api/overlay/drag/move`
pub async fn drag_move(
    State(state): State<Arc<AppState>>,
    Json(pointer): Json<ScreenPoint>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "moved": state.correlator.drag_to(pointer) }))
}

/// `POST /api/overlay/drag/end`
pub async fn drag_end(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "ended": state.correlator.end_drag() }))
}

// ---------------------------------------------------------------------------
// Engine entry points
// ---------------------------------------------------------------------------

fn inbound(state: &AppState) -> Result<InboundPort, GatewayError> {
    state.link.inbound().ok_or(GatewayError::NotLoaded)
}

/// Generic notification entry point.
pub async fn engine_notify(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, GatewayError> {
    inbound(&state)?.notify_value(payload)?;
    Ok(StatusCode::ACCEPTED)
}

/// Click on a robot.
pub async fn robot_clicked(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, GatewayError> {
    inbound(&state)?.robot_clicked(payload)?;
    Ok(StatusCode::ACCEPTED)
}

/// Click on a station.
pub async fn station_clicked(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, GatewayError> {
    inbound(&state)?.station_clicked(payload)?;
    Ok(StatusCode::ACCEPTED)
}

/// Click on a product.
pub async fn product_clicked(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, GatewayError> {
    inbound(&state)?.product_clicked(payload)?;
    Ok(StatusCode::ACCEPTED)
}

const fn content_type(role: ArtifactRole) -> &'static str {
    match role {
        ArtifactRole::LoaderScript | ArtifactRole::FrameworkScript => "application/javascript",
        ArtifactRole::Code => "application/wasm",
        ArtifactRole::Data => "application/octet-stream",
    }
}

/// Serve a fetched artifact to the page.
pub async fn get_artifact(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let fetched = state
        .loader
        .artifacts()
        .and_then(|artifacts| artifacts.by_name(&name).cloned())
        .ok_or_else(|| GatewayError::NotFound(format!("artifact `{name}`")))?;

    info!(artifact = %name, bytes = fetched.bytes.len(), "serving engine artifact");
    Ok((
        [(header::CONTENT_TYPE, content_type(fetched.artifact.role))],
        Bytes::from(fetched.bytes.to_vec()),
    ))
}
