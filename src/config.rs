//! Service configuration.
//!
//! Handles loading, validating, and merging `config.toml`. Configuration is
//! layered: stock defaults are overridden by the config file, which is in
//! turn overridden by command-line flags.
//!
//! ## Configuration Options
//!
//! ```toml
//! [server]
//! port = 4000                 # HTTP port
//! bind = "0.0.0.0"            # Listen address
//! username = ""               # Basic auth, enabled when both are set
//! password = ""
//! shutdown_grace_secs = 30    # How long shutdown waits for running splits
//!
//! [storage]
//! root = "/srv/split/"        # Required. Existing, writable directory
//! url_host = "https://img/"   # Required. Prefix for request URLs
//!
//! [processing]
//! max_height = 5000           # Row limit per chunk
//! strategy = "native"         # "native" or "cli"
//! toolkit = "vips"            # cli strategy: "vips" or "imagemagick"
//! jpeg_quality = 90           # 1-100
//! fetch_timeout_secs = 120    # native strategy download timeout
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse; override just the values you want:
//!
//! ```toml
//! [storage]
//! root = "/var/lib/image-splitter"
//! url_host = "https://images.example.com/"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{Strategy, Toolkit};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration loaded from `config.toml`.
///
/// Everything except the `[storage]` keys has a working default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// HTTP listener and lifecycle settings.
    pub server: ServerConfig,
    /// Where runs are written and how request URLs are resolved.
    pub storage: StorageConfig,
    /// Chunking and backend selection.
    pub processing: ProcessingConfig,
}

impl AppConfig {
    /// Validate config values and check the storage root on disk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let host = &self.storage.url_host;
        if host.is_empty() {
            return Err(ConfigError::Validation(
                "storage.url_host must be set".into(),
            ));
        }
        if !(host.starts_with("http://") || host.starts_with("https://")) {
            return Err(ConfigError::Validation(
                "storage.url_host must start with http:// or https://".into(),
            ));
        }
        if !host.ends_with('/') {
            return Err(ConfigError::Validation(
                "storage.url_host must end with a slash".into(),
            ));
        }
        if self.processing.max_height == 0 {
            return Err(ConfigError::Validation(
                "processing.max_height must be greater than 0".into(),
            ));
        }
        if !(1..=100).contains(&self.processing.jpeg_quality) {
            return Err(ConfigError::Validation(
                "processing.jpeg_quality must be 1-100".into(),
            ));
        }
        if self.processing.fetch_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "processing.fetch_timeout_secs must be greater than 0".into(),
            ));
        }
        check_storage_root(&self.storage.root)
    }
}

fn check_storage_root(root: &Path) -> Result<(), ConfigError> {
    if root.as_os_str().is_empty() {
        return Err(ConfigError::Validation("storage.root must be set".into()));
    }
    let meta = fs::metadata(root).map_err(|_| {
        ConfigError::Validation(format!(
            "storage.root {} does not exist",
            root.display()
        ))
    })?;
    if !meta.is_dir() {
        return Err(ConfigError::Validation(format!(
            "storage.root {} is not a directory",
            root.display()
        )));
    }
    // Permission bits say nothing about which user may write, so try it.
    // The file is removed when dropped.
    tempfile::Builder::new()
        .prefix(".write-check")
        .tempfile_in(root)
        .map_err(|e| {
            ConfigError::Validation(format!(
                "storage.root {} is not writable: {e}",
                root.display()
            ))
        })?;
    Ok(())
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub username: String,
    pub password: String,
    /// Seconds shutdown waits for in-flight runs before exiting anyway.
    pub shutdown_grace_secs: u64,
}

impl ServerConfig {
    /// Basic auth applies only when both credentials are non-empty.
    pub fn auth_enabled(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            bind: "0.0.0.0".to_string(),
            username: String::new(),
            password: String::new(),
            shutdown_grace_secs: 30,
        }
    }
}

/// Storage settings. Both keys are required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory that receives one subdirectory per run.
    pub root: PathBuf,
    /// Trusted base URL; request URLs are appended to it.
    pub url_host: String,
}

/// Chunking and backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum rows per chunk.
    pub max_height: u32,
    pub strategy: Strategy,
    /// Tools driven by the `cli` strategy.
    pub toolkit: Toolkit,
    pub jpeg_quality: u32,
    pub fetch_timeout_secs: u64,
}

impl ProcessingConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_height: 5000,
            strategy: Strategy::Native,
            toolkit: Toolkit::Vips,
            jpeg_quality: 90,
            fetch_timeout_secs: 120,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(AppConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge overlays onto a base value in order, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlays: impl IntoIterator<Item = toml::Value>,
) -> Result<AppConfig, ConfigError> {
    let merged = overlays.into_iter().fold(base, merge_toml);
    let config: AppConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the effective config: stock defaults, then the config file, then
/// `cli_overlay`.
///
/// An explicitly named `file` must exist; without one, `config.toml` in the
/// working directory is used when present.
pub fn load_config(
    file: Option<&Path>,
    cli_overlay: Option<toml::Value>,
) -> Result<AppConfig, ConfigError> {
    let file_layer = match file {
        Some(path) if !path.exists() => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }
        Some(path) => load_raw_config(path)?,
        None => load_raw_config(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    resolve_config(
        stock_defaults_value()?,
        file_layer.into_iter().chain(cli_overlay),
    )
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Image Splitter Configuration
# ===========================
# Values shown below are the defaults. Only the [storage] keys must be set.
# Command-line flags override values from this file.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# HTTP service
# ---------------------------------------------------------------------------
[server]
port = 4000
bind = "0.0.0.0"

# HTTP basic auth for POST /split-image. Enabled only when both are set.
username = ""
password = ""

# On SIGINT/SIGTERM, wait this long for running splits before exiting.
shutdown_grace_secs = 30

# ---------------------------------------------------------------------------
# Storage
# ---------------------------------------------------------------------------
[storage]
# Existing, writable directory. Every run creates a subdirectory here named
# after its start time in unix seconds. Runs are never cleaned up.
root = ""

# Trusted base URL. The `url` field of a request is appended to it.
# Must start with http:// or https:// and end with a slash.
url_host = ""

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum height in pixels of one chunk.
max_height = 5000

# "native" decodes, crops and zips in-process.
# "cli" shells out to curl, an image toolkit and zip.
strategy = "native"

# Image toolkit for the cli strategy: "vips" or "imagemagick".
toolkit = "vips"

# JPEG encoding quality (1 = worst, 100 = best).
jpeg_quality = 90

# Download timeout for the native strategy.
fetch_timeout_secs = 120
"##
}
