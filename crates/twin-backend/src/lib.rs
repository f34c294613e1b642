//! HTTP collaborators of the twin host.
//!
//! - [`client`] -- [`HttpBackend`], the dashboard backend's snapshot and
//!   detail endpoints.
//! - [`artifacts`] -- [`HttpArtifactFetcher`] for the engine runtime build.
//! - [`error`] -- [`BackendError`].
//!
//! [`HttpBackend`]: client::HttpBackend
//! [`HttpArtifactFetcher`]: artifacts::HttpArtifactFetcher
//! [`BackendError`]: error::BackendError

pub mod artifacts;
pub mod client;
pub mod error;

pub use artifacts::HttpArtifactFetcher;
pub use client::HttpBackend;
pub use error::BackendError;
