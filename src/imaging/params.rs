//! Parameter types for backend operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the high-level [`operations`](super::operations) module
//! (which turns a chunk plan into file paths) and the
//! [`backend`](super::backend) (which does the pixel work). This separation
//! allows swapping backends (in-process, external tools, or a test mock)
//! without changing pipeline logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`CropParams`]: One output rectangle: destination path plus source region.
//! - [`RenderParams`]: A source file and all its crops, in planner order.
//! - [`ArchiveParams`]: Archive destination and ordered entry files.

use crate::types::SourceFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// One rectangle to cut out of the source and write to `output`.
#[derive(Debug, Clone, PartialEq)]
pub struct CropParams {
    pub output: PathBuf,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Parameters for rendering every chunk of one source image.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub source: PathBuf,
    /// Format of the source; the in-process backend encodes chunks to match.
    pub format: SourceFormat,
    pub quality: Quality,
    pub crops: Vec<CropParams>,
}

/// Parameters for an archive operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveParams {
    pub output: PathBuf,
    /// Files to add, in order. Stored under their base names.
    pub entries: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_90() {
        assert_eq!(Quality::default().value(), 90);
    }
}
