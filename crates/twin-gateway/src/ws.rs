//! `WebSocket` handlers.
//!
//! - `GET /ws/engine` is the runtime's link to the host. Every
//!   [`EngineCommand`](crate::engine::EngineCommand) is sent down as a JSON
//!   text frame; text frames coming up are pointer notifications and go
//!   through the bound inbound port.
//! - `GET /ws/overlay` streams the overlay view to the page. The current
//!   view is sent on connect, then again on every change.
//!
//! If a client falls behind on the engine stream, lagged commands are
//! skipped and the client resumes from the most recent one.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade to the engine link socket.
///
/// # Route
///
/// `GET /ws/engine`
pub async fn ws_engine(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_engine(socket, state))
}

/// Upgrade to the overlay view stream.
///
/// # Route
///
/// `GET /ws/overlay`
pub async fn ws_overlay(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_overlay(socket, state))
}

/// Serialize `value` and send it as a text frame.
///
/// Returns `false` once the client is gone.
async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    let json = match serde_json::to_string(value) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize socket frame: {e}");
            return true;
        }
    };
    socket.send(Message::Text(json.into())).await.is_ok()
}

async fn handle_engine(mut socket: WebSocket, state: Arc<AppState>) {
    debug!("engine socket connected");

    let (boot, mut rx) = state.link.connect();

    if let Some(boot) = boot
        && !send_json(&mut socket, &boot).await
    {
        debug!("engine socket disconnected (boot replay failed)");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(command) => {
                        if !send_json(&mut socket, &command).await {
                            debug!("engine socket disconnected (send failed)");
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "engine socket lagged, commands skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("engine link closed, shutting down socket");
                        return;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("engine socket disconnected");
                        return;
                    }
                    Some(Ok(Message::Text(text))) => {
                        match state.link.inbound() {
                            Some(port) => {
                                if let Err(e) = port.notify(text.as_str()) {
                                    warn!(error = %e, "dropping engine notification");
                                }
                            }
                            None => debug!("notification before engine bound, dropped"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("engine socket disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("engine socket error: {e}");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn handle_overlay(mut socket: WebSocket, state: Arc<AppState>) {
    debug!("overlay socket connected");

    let mut rx = state.correlator.subscribe();
    let initial = rx.borrow_and_update().clone();
    if !send_json(&mut socket, &initial).await {
        return;
    }

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!("overlay view channel closed, shutting down socket");
                    return;
                }
                let view = rx.borrow_and_update().clone();
                if !send_json(&mut socket, &view).await {
                    debug!("overlay socket disconnected (send failed)");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => {
                        debug!("overlay socket disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            return;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}
