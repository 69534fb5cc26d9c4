//! Configuration loading for the arcam camera session controller.
//!
//! The only external configuration surface the controller has is the
//! `SessionConfig` (SDK credentials and camera parameters) plus the log
//! level. Values are opaque pass-through; the controller checks presence,
//! never content.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/arcam/config.toml` (system)
//! 2. `~/.config/arcam/config.toml` (user)
//! 3. `./arcam.toml` (local override, replaced by an explicit `--config` path)
//! 4. Environment variables (`ARCAM_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [session.credentials]
//! api_url = "https://sdk.example.com"
//! api_key = "..."
//! secret_key = "..."
//! auth_key = "..."
//!
//! [session.camera]
//! width = 720
//! height = 1280
//! facing = "front"
//! mirror = true
//!
//! [session.capabilities]
//! require_microphone = true
//!
//! [session.inference]
//! features = ["face_high_tracking", "background_segmentation"]
//!
//! [telemetry]
//! log_level = "debug"
//! ```

pub mod loader;
pub mod session;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use session::{
    CameraConfig, CameraFacing, CapabilityConfig, Credentials, InferenceConfig, InferenceFeature,
    SessionConfig,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive string.
    /// Default: "info"
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Complete arcam configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArcamConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ArcamConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace the local override.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where the values came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        Self::load_files(&files)
    }

    /// Load an explicit list of files (in order, later wins), then apply
    /// environment overrides.
    pub fn load_files(files: &[PathBuf]) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::load_table(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let origin = files.last().cloned().unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::from_table(merged, &origin)?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Parse a single TOML document with no file discovery or env overlay.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let origin = Path::new("<inline>");
        let table = loader::parse_table(contents, origin)?;
        loader::from_table(table, origin)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let body = toml::to_string_pretty(self).unwrap_or_default();
        format!("# arcam configuration\n\n{body}")
    }
}
