//! Axum router construction for the gateway.
//!
//! Assembles the engine entry points, the presentation API and both
//! `WebSocket` endpoints into a single [`Router`] with CORS enabled so the
//! page can be served from another origin.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the Axum router with all gateway routes.
///
/// # Routes
///
/// | Method | Path | Description |
/// |--------|------|-------------|
/// | GET | `/` | Status page |
/// | GET | `/ws/engine` | Engine command / notification socket |
/// | GET | `/ws/overlay` | Overlay view stream |
/// | POST | `/engine/notify` | Generic pointer notification |
/// | POST | `/engine/{robot,station,product}-clicked` | Per-kind click entry points |
/// | GET | `/engine/artifacts/{name}` | Fetched runtime artifact |
/// | GET | `/api/health` | Liveness |
/// | GET | `/api/session` | Session status |
/// | POST | `/api/session/{load,retry,skip,reattach,visibility}` | Session control |
/// | PUT/DELETE | `/api/layout/{id}` | Container bounds |
/// | GET | `/api/sync` | Sync loop status |
/// | POST | `/api/sync/{start,stop}` | Sync loop control |
/// | POST | `/api/context` | Change the active context |
/// | POST | `/api/highlight` | Highlight an entity |
/// | GET | `/api/overlay` | Overlay view |
/// | POST | `/api/overlay/{dismiss,retry}` | Overlay control |
/// | POST | `/api/overlay/drag/{begin,move,end}` | Overlay dragging |
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status page
        .route("/", get(handlers::index))
        // WebSocket
        .route("/ws/engine", get(ws::ws_engine))
        .route("/ws/overlay", get(ws::ws_overlay))
        // Engine entry points
        .route("/engine/notify", post(handlers::engine_notify))
        .route("/engine/robot-clicked", post(handlers::robot_clicked))
        .route("/engine/station-clicked", post(handlers::station_clicked))
        .route("/engine/product-clicked", post(handlers::product_clicked))
        .route("/engine/artifacts/{name}", get(handlers::get_artifact))
        // Session
        .route("/api/health", get(handlers::health))
        .route("/api/session", get(handlers::get_session))
        .route("/api/session/load", post(handlers::load_session))
        .route("/api/session/retry", post(handlers::retry_session))
        .route("/api/session/skip", post(handlers::skip_session))
        .route("/api/session/reattach", post(handlers::reattach_session))
        .route("/api/session/visibility", post(handlers::set_visibility))
        .route(
            "/api/layout/{id}",
            put(handlers::put_layout).delete(handlers::delete_layout),
        )
        // Sync + bridge
        .route("/api/sync", get(handlers::get_sync))
        .route("/api/sync/start", post(handlers::start_sync))
        .route("/api/sync/stop", post(handlers::stop_sync))
        .route("/api/context", post(handlers::set_context))
        .route("/api/highlight", post(handlers::highlight))
        // Overlay
        .route("/api/overlay", get(handlers::get_overlay))
        .route("/api/overlay/dismiss", post(handlers::dismiss_overlay))
        .route("/api/overlay/retry", post(handlers::retry_overlay))
        .route("/api/overlay/drag/begin", post(handlers::drag_begin))
        .route("/api/overlay/drag/move", post(handlers::drag_move))
        .route("/api/overlay/drag/end", post(handlers::drag_end))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
