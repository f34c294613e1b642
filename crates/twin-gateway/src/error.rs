//! Error types for the gateway.
//!
//! [`GatewayError`] unifies every failure a request can hit and converts
//! into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use twin_core::inbound::NotificationParseError;
use twin_core::loader::LoadError;
use twin_core::registry::RegistryError;
use twin_core::sync::SyncError;

/// Errors that can occur in the gateway API layer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request body or path was invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request needs a live engine instance.
    #[error("no engine instance is loaded")]
    NotLoaded,

    /// The engine load failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The synchronization loop refused to start.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// An engine notification was rejected.
    #[error(transparent)]
    Notification(#[from] NotificationParseError),
}

impl GatewayError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::Registry(RegistryError::ContainerNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidRequest(_) | Self::Sync(_) => StatusCode::BAD_REQUEST,
            Self::NotLoaded | Self::Registry(RegistryError::NotLoaded) => StatusCode::CONFLICT,
            Self::Load(LoadError::ArtifactFetchFailed { .. }) => StatusCode::BAD_GATEWAY,
            Self::Load(LoadError::InstantiationFailed { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Notification(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use twin_types::ContainerId;

    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(
            GatewayError::from(RegistryError::ContainerNotFound(ContainerId::new("x"))).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(GatewayError::from(RegistryError::NotLoaded).status(), StatusCode::CONFLICT);
        assert_eq!(
            GatewayError::from(LoadError::ArtifactFetchFailed {
                artifact: "line.wasm".to_owned(),
                reason: "404".to_owned(),
            })
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::from(SyncError::BlankContext).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
