//! High-level image operations.
//!
//! These functions combine the pure chunk plan with backend execution.
//! They take a plan, compute backend parameters, and call the backend.

use super::backend::{BackendError, SplitBackend};
use super::params::{ArchiveParams, CropParams, Quality, RenderParams};
use crate::naming::original_file_name;
use crate::types::{ChunkSpec, ImageSource, SourceFormat};
use std::path::{Path, PathBuf};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Download `url` into `work_dir` as `original_image.{jpg,png}`.
pub fn fetch_source(
    backend: &(impl SplitBackend + ?Sized),
    url: &str,
    work_dir: &Path,
) -> Result<ImageSource> {
    let format = SourceFormat::from_url(url);
    let local_path = work_dir.join(original_file_name(format.extension()));
    backend.fetch(url, &local_path)?;
    Ok(ImageSource {
        url: url.to_string(),
        local_path,
        format,
    })
}

/// Get image dimensions using the backend.
pub fn get_dimensions(backend: &(impl SplitBackend + ?Sized), path: &Path) -> Result<(u32, u32)> {
    let dims = backend.identify(path)?;
    Ok((dims.width, dims.height))
}

/// Plan the render call for a set of chunks without executing it.
///
/// Useful for testing parameter generation.
pub fn plan_render(
    source: &ImageSource,
    work_dir: &Path,
    chunks: &[ChunkSpec],
    quality: Quality,
) -> RenderParams {
    RenderParams {
        source: source.local_path.clone(),
        format: source.format,
        quality,
        crops: chunks
            .iter()
            .map(|c| CropParams {
                output: work_dir.join(&c.file_name),
                x: c.x_offset,
                y: c.start_y,
                width: c.out_width,
                height: c.height(),
            })
            .collect(),
    }
}

/// Render every chunk into `work_dir`, returning their paths in plan order.
pub fn render_chunks(
    backend: &(impl SplitBackend + ?Sized),
    source: &ImageSource,
    work_dir: &Path,
    chunks: &[ChunkSpec],
    quality: Quality,
) -> Result<Vec<PathBuf>> {
    let params = plan_render(source, work_dir, chunks, quality);
    backend.render(&params)?;
    Ok(params.crops.into_iter().map(|c| c.output).collect())
}

/// Bundle rendered chunks into one archive at `output`.
pub fn archive_chunks(
    backend: &(impl SplitBackend + ?Sized),
    output: &Path,
    entries: &[PathBuf],
) -> Result<()> {
    backend.archive(&ArchiveParams {
        output: output.to_path_buf(),
        entries: entries.to_vec(),
    })
}
