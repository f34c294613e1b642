//! Error types for the host binary.
//!
//! [`HostError`] is the top-level error type that wraps every failure mode
//! during startup and shutdown.

/// Top-level error for the host binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: twin_core::config::ConfigError,
    },

    /// The backend client could not be built.
    #[error("backend error: {source}")]
    Backend {
        /// The underlying backend error.
        #[from]
        source: twin_backend::BackendError,
    },

    /// The synchronization loop refused to start.
    #[error("sync error: {source}")]
    Sync {
        /// The underlying sync error.
        #[from]
        source: twin_core::sync::SyncError,
    },

    /// The gateway server failed.
    #[error("gateway error: {source}")]
    Gateway {
        /// The underlying server error.
        #[from]
        source: twin_gateway::ServerError,
    },
}
