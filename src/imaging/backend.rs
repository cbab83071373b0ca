//! Split backend trait and shared types.
//!
//! The [`SplitBackend`] trait defines the four operations every execution
//! strategy must support: fetch, identify, render, and archive.
//!
//! | Operation | [`RustBackend`](super::rust_backend::RustBackend) | [`CliBackend`](super::cli_backend::CliBackend) |
//! |---|---|---|
//! | **Fetch** | `reqwest` streaming GET | `curl --fail` |
//! | **Identify** | `image` header read | `vipsheader` / `identify` |
//! | **Render** | decode once, copy pixels per chunk | one `vips crop` / `convert -crop` per chunk |
//! | **Archive** | `zip` crate, deflate | `zip -j` |
//!
//! The pipeline only ever sees `&dyn SplitBackend`, so the strategy is picked
//! once at startup and never branched on again.

use super::params::{ArchiveParams, RenderParams};
use std::path::Path;
use thiserror::Error;

/// Failure of one pipeline stage. The variant is the stage that failed.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to download image: {0}")]
    Fetch(String),
    #[error("failed to get image dimensions: {0}")]
    Probe(String),
    #[error("failed to split image: {0}")]
    Render(String),
    #[error("failed to create zip file: {0}")]
    Archive(String),
}

impl BackendError {
    /// Short stage name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Fetch(_) => "fetch",
            BackendError::Probe(_) => "probe",
            BackendError::Render(_) => "render",
            BackendError::Archive(_) => "archive",
        }
    }
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for split backends.
///
/// Every backend must implement all four operations so the orchestrator is
/// backend-agnostic. See the [module docs](self) for the parity table.
pub trait SplitBackend: Send + Sync {
    /// Download `url` byte-for-byte into `dest`. The parent directory exists.
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), BackendError>;

    /// Get image dimensions.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Write every crop in `params`, in order, stopping at the first failure.
    fn render(&self, params: &RenderParams) -> Result<(), BackendError>;

    /// Bundle the entries into one archive, stored by base name.
    fn archive(&self, params: &ArchiveParams) -> Result<(), BackendError>;

    /// Whether this backend shells out to external tools.
    fn uses_external_tools(&self) -> bool {
        false
    }
}
