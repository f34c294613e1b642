//! Configuration loading and typed config structures for the twin host.
//!
//! The canonical configuration lives in `twin-config.yaml` next to the
//! binary's working directory. This module defines strongly-typed structs
//! that mirror the YAML structure and a loader that reads and validates the
//! file. Every section is optional; missing values fall back to the defaults
//! the dashboard ships with.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{Artifact, ArtifactManifest, ArtifactRole};

/// Smallest accepted synchronization interval.
pub const MIN_SYNC_INTERVAL_MS: u64 = 100;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is outside its accepted range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level host configuration.
///
/// Mirrors the structure of `twin-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TwinConfig {
    /// Engine runtime artifacts and display surface.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Backend data collaborator.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Synchronization loop settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Overlay anchoring fallbacks.
    #[serde(default)]
    pub overlay: OverlayConfig,

    /// HTTP / `WebSocket` gateway binding.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl TwinConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `TWIN_BACKEND_URL` overrides `backend.base_url`
    /// - `TWIN_ARTIFACT_BASE_URL` overrides `engine.artifact_base_url`
    /// - `TWIN_FETCH_TIMEOUT_MS` overrides `engine.fetch_timeout_ms`
    /// - `TWIN_CONTEXT_KEY` overrides `sync.context_key`
    /// - `TWIN_GATEWAY_PORT` overrides `gateway.port`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_with(&contents, |key| std::env::var(key).ok())
    }

    /// Parse configuration from a YAML string, applying environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse_with(yaml, |key| std::env::var(key).ok())
    }

    /// Parse configuration, resolving overrides through `lookup` instead of
    /// the process environment.
    ///
    /// # Errors
    ///
    /// Same as [`TwinConfig::parse`].
    pub fn parse_with(
        yaml: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TWIN_*` overrides resolved through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `TWIN_GATEWAY_PORT` is not a port
    /// or `TWIN_FETCH_TIMEOUT_MS` is not a number.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup("TWIN_BACKEND_URL") {
            self.backend.base_url = val;
        }
        if let Some(val) = lookup("TWIN_ARTIFACT_BASE_URL") {
            self.engine.artifact_base_url = val;
        }
        if let Some(val) = lookup("TWIN_FETCH_TIMEOUT_MS") {
            self.engine.fetch_timeout_ms = val.parse().map_err(|e| ConfigError::Invalid {
                field: "engine.fetch_timeout_ms",
                reason: format!("TWIN_FETCH_TIMEOUT_MS: {e}"),
            })?;
        }
        if let Some(val) = lookup("TWIN_CONTEXT_KEY") {
            self.sync.context_key = val;
        }
        if let Some(val) = lookup("TWIN_GATEWAY_PORT") {
            self.gateway.port = val.parse().map_err(|e| ConfigError::Invalid {
                field: "gateway.port",
                reason: format!("TWIN_GATEWAY_PORT: {e}"),
            })?;
        }
        Ok(())
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.interval_ms < MIN_SYNC_INTERVAL_MS {
            return Err(ConfigError::Invalid {
                field: "sync.interval_ms",
                reason: format!(
                    "{} is below the {MIN_SYNC_INTERVAL_MS}ms minimum",
                    self.sync.interval_ms
                ),
            });
        }
        if self.engine.build_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "engine.build_name",
                reason: "must not be empty".to_owned(),
            });
        }
        if self.engine.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.fetch_timeout_ms",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if !is_positive(self.overlay.fallback_viewport_width)
            || !is_positive(self.overlay.fallback_viewport_height)
        {
            return Err(ConfigError::Invalid {
                field: "overlay.fallback_viewport",
                reason: "width and height must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

/// Finite and strictly greater than zero. Rejects NaN.
const fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Engine runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Base URL the runtime build is served from.
    #[serde(default = "default_artifact_base_url")]
    pub artifact_base_url: String,

    /// File stem shared by every artifact of the build.
    #[serde(default = "default_build_name")]
    pub build_name: String,

    /// Container the surface is created in when no view asked for one.
    #[serde(default = "default_surface")]
    pub default_surface: String,

    /// Engine-side object that receives host commands.
    #[serde(default = "default_target_object")]
    pub target_object: String,

    /// Whole-request timeout for one artifact download, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl EngineConfig {
    /// Artifact download timeout as a [`Duration`].
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// The four artifacts of a web runtime build: loader script, framework
    /// script, data payload and code payload.
    pub fn manifest(&self) -> ArtifactManifest {
        let base = self.artifact_base_url.trim_end_matches('/');
        let stem = &self.build_name;
        let artifact = |role: ArtifactRole, suffix: &str| {
            let name = format!("{stem}.{suffix}");
            Artifact {
                role,
                url: format!("{base}/{name}"),
                name,
            }
        };
        ArtifactManifest::new(vec![
            artifact(ArtifactRole::LoaderScript, "loader.js"),
            artifact(ArtifactRole::FrameworkScript, "framework.js"),
            artifact(ArtifactRole::Data, "data"),
            artifact(ArtifactRole::Code, "wasm"),
        ])
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifact_base_url: default_artifact_base_url(),
            build_name: default_build_name(),
            default_surface: default_surface(),
            target_object: default_target_object(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

/// Backend data collaborator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the dashboard REST API.
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl BackendConfig {
    /// Request timeout as a [`Duration`].
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Synchronization loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Milliseconds between synchronization ticks.
    #[serde(default = "default_sync_interval_ms")]
    pub interval_ms: u64,

    /// Tenant / company key synchronized at startup.
    #[serde(default = "default_context_key")]
    pub context_key: String,

    /// Whether the host starts polling at startup, before any view asks.
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl SyncConfig {
    /// Interval as a [`Duration`].
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sync_interval_ms(),
            context_key: default_context_key(),
            autostart: true,
        }
    }
}

/// Overlay anchoring fallback used when the display surface cannot be
/// located.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverlayConfig {
    /// Horizontal offset added to fallback anchors.
    #[serde(default)]
    pub fallback_offset_x: f64,

    /// Vertical offset added to fallback anchors (the navbar height).
    #[serde(default = "default_fallback_offset_y")]
    pub fallback_offset_y: f64,

    /// Nominal surface width for mapping normalized positions.
    #[serde(default = "default_fallback_viewport_width")]
    pub fallback_viewport_width: f64,

    /// Nominal surface height for mapping normalized positions.
    #[serde(default = "default_fallback_viewport_height")]
    pub fallback_viewport_height: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            fallback_offset_x: 0.0,
            fallback_offset_y: default_fallback_offset_y(),
            fallback_viewport_width: default_fallback_viewport_width(),
            fallback_viewport_height: default_fallback_viewport_height(),
        }
    }
}

/// Gateway server binding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    /// Address to bind.
    #[serde(default = "default_gateway_host")]
    pub host: String,

    /// TCP port.
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_artifact_base_url() -> String {
    "http://localhost:3000/unity3d".to_owned()
}

fn default_build_name() -> String {
    "factoryTwin".to_owned()
}

fn default_surface() -> String {
    "unity-canvas".to_owned()
}

fn default_target_object() -> String {
    "GameManager".to_owned()
}

const fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_backend_url() -> String {
    "http://localhost:8080/api".to_owned()
}

const fn default_request_timeout_ms() -> u64 {
    5_000
}

const fn default_sync_interval_ms() -> u64 {
    3_000
}

fn default_context_key() -> String {
    "1".to_owned()
}

const fn default_true() -> bool {
    true
}

const fn default_fallback_offset_y() -> f64 {
    64.0
}

const fn default_fallback_viewport_width() -> f64 {
    1280.0
}

const fn default_fallback_viewport_height() -> f64 {
    720.0
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_gateway_port() -> u16 {
    8090
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn default_config_is_valid() {
        let config = TwinConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.interval_ms, 3_000);
        assert_eq!(config.engine.build_name, "factoryTwin");
        assert_eq!(config.gateway.port, 8090);
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r#"
backend:
  base_url: "http://backend:8080/api"
sync:
  interval_ms: 1500
  context_key: "A01"
"#;
        let config = TwinConfig::parse_with(yaml, no_env).unwrap();
        assert_eq!(config.backend.base_url, "http://backend:8080/api");
        assert_eq!(config.backend.request_timeout_ms, 5_000);
        assert_eq!(config.sync.interval(), Duration::from_millis(1500));
        assert_eq!(config.sync.context_key, "A01");
        assert_eq!(config.engine.default_surface, "unity-canvas");
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let yaml = include_str!("../../../twin-config.yaml");
        let config = TwinConfig::parse_with(yaml, no_env).unwrap();
        assert_eq!(config, TwinConfig::default());
    }

    #[test]
    fn empty_yaml_uses_defaults() {
        let config = TwinConfig::parse_with("{}", no_env).unwrap();
        assert_eq!(config, TwinConfig::default());
    }

    #[test]
    fn rejects_too_fast_sync_interval() {
        let result = TwinConfig::parse_with("sync:\n  interval_ms: 10\n", no_env);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "sync.interval_ms",
                ..
            })
        ));
    }

    #[test]
    fn overrides_win_over_yaml() {
        let lookup = |key: &str| match key {
            "TWIN_BACKEND_URL" => Some("http://override/api".to_owned()),
            "TWIN_CONTEXT_KEY" => Some("B02".to_owned()),
            "TWIN_GATEWAY_PORT" => Some("9999".to_owned()),
            _ => None,
        };
        let config = TwinConfig::parse_with("backend:\n  base_url: http://yaml/api\n", lookup)
            .unwrap();
        assert_eq!(config.backend.base_url, "http://override/api");
        assert_eq!(config.sync.context_key, "B02");
        assert_eq!(config.gateway.port, 9999);
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let lookup = |key: &str| (key == "TWIN_GATEWAY_PORT").then(|| "not-a-port".to_owned());
        let result = TwinConfig::parse_with("{}", lookup);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_nan_viewport() {
        let yaml = "overlay:\n  fallback_viewport_width: .nan\n";
        let result = TwinConfig::parse_with(yaml, no_env);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "overlay.fallback_viewport",
                ..
            })
        ));

        let mut config = TwinConfig::default();
        config.overlay.fallback_viewport_height = f64::NAN;
        assert!(config.validate().is_err());
        config.overlay.fallback_viewport_height = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fetch_timeout_override_and_floor() {
        let lookup = |key: &str| (key == "TWIN_FETCH_TIMEOUT_MS").then(|| "750".to_owned());
        let config = TwinConfig::parse_with("{}", lookup).unwrap();
        assert_eq!(config.engine.fetch_timeout(), Duration::from_millis(750));

        let result = TwinConfig::parse_with("engine:\n  fetch_timeout_ms: 0\n", no_env);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "engine.fetch_timeout_ms",
                ..
            })
        ));

        let bad = |key: &str| (key == "TWIN_FETCH_TIMEOUT_MS").then(|| "soon".to_owned());
        assert!(TwinConfig::parse_with("{}", bad).is_err());
    }

    #[test]
    fn manifest_lists_build_artifacts() {
        let engine = EngineConfig {
            artifact_base_url: "http://cdn/unity3d/".to_owned(),
            ..EngineConfig::default()
        };
        let manifest = engine.manifest();
        let urls: Vec<&str> = manifest.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "http://cdn/unity3d/factoryTwin.loader.js",
                "http://cdn/unity3d/factoryTwin.framework.js",
                "http://cdn/unity3d/factoryTwin.data",
                "http://cdn/unity3d/factoryTwin.wasm",
            ]
        );
    }
}
