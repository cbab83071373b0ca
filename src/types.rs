//! Data model shared by every pipeline stage.
//!
//! All values here are scoped to a single run. They are created by one stage,
//! handed forward, and never mutated afterwards.

use serde::Serialize;
use std::path::PathBuf;

/// Encoding of the source image, decided from the URL suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Jpeg,
    Png,
}

impl SourceFormat {
    /// `.png` (any case) is PNG; everything else is treated as JPEG.
    pub fn from_url(url: &str) -> Self {
        if url.to_ascii_lowercase().ends_with(".png") {
            SourceFormat::Png
        } else {
            SourceFormat::Jpeg
        }
    }

    /// File extension used for the downloaded original.
    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "jpg",
            SourceFormat::Png => "png",
        }
    }
}

/// The fetched original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub url: String,
    pub local_path: PathBuf,
    pub format: SourceFormat,
}

/// One planned vertical slice of the source.
///
/// Invariant: `start_y < end_y` and `x_offset + out_width` never exceeds the
/// source width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkSpec {
    /// 1-based, dense.
    pub index: u32,
    pub start_y: u32,
    pub end_y: u32,
    pub x_offset: u32,
    pub out_width: u32,
    pub file_name: String,
}

impl ChunkSpec {
    pub fn height(&self) -> u32 {
        self.end_y - self.start_y
    }
}

/// A rendered chunk on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResult {
    pub spec: ChunkSpec,
    pub absolute_path: PathBuf,
    /// Path relative to the storage root, `/`-separated.
    pub relative_path: String,
}

/// The archive produced for a run, when one was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveResult {
    pub absolute_path: PathBuf,
    pub relative_path: String,
}

/// Everything a caller gets back from a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingResult {
    pub status: &'static str,
    pub message: String,
    pub archive: Option<ArchiveResult>,
    pub chunks: Vec<ChunkResult>,
}
