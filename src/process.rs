//! The split pipeline: fetch, probe, plan, render, archive.
//!
//! One call to [`run`] is one run. It owns a fresh directory under the
//! storage root, named by the start time in unix seconds, and leaves
//! everything it produced there:
//!
//! ```text
//! <storage root>/
//! └── 1700000000/
//!     ├── original_image.png     # download, extension from the URL
//!     ├── chapter_01.jpg         # chunks, top to bottom
//!     ├── chapter_02.jpg
//!     ├── chapter_03.jpg
//!     └── chapter.zip            # only when an archive was requested
//! ```
//!
//! When two runs start within the same second the later one gets
//! `1700000000-1`, `1700000000-2`, and so on. Directory creation is the
//! reservation, so concurrent runs never share a directory.
//!
//! Run directories are never removed, including those of failed runs; the
//! failure log line names the directory.
//!
//! ## Strategy
//!
//! [`run`] takes the backend as a `&dyn SplitBackend` so the host picks the
//! in-process or external-tool strategy once at startup. Everything else a
//! run needs comes from an immutable [`RunConfig`].

use crate::config::AppConfig;
use crate::imaging::{
    BackendError, PlanError, Quality, SplitBackend, archive_chunks, fetch_source, get_dimensions,
    plan_chunks, render_chunks,
};
use crate::naming::{archive_file_name, is_valid_prefix};
use crate::types::{ArchiveResult, ChunkResult, ProcessingResult};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, info};

/// Upper bound on `-N` suffixes tried for one second-resolution name.
const MAX_RUN_DIR_SUFFIX: u32 = 10_000;

#[derive(Error, Debug)]
pub enum ProcessError {
    /// The request was rejected before any work started.
    #[error("{0}")]
    Validation(String),
    #[error("failed to create run directory {}: {source}", .path.display())]
    RunDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ProcessError {
    /// Stage that failed, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Validation(_) => "validation",
            ProcessError::RunDir { .. } => "io",
            ProcessError::Plan(_) => "plan",
            ProcessError::Backend(e) => e.kind(),
        }
    }

    /// Whether the caller sent something unusable, as opposed to the run
    /// failing.
    pub fn is_validation(&self) -> bool {
        matches!(self, ProcessError::Validation(_))
    }
}

/// Settings shared by every run of a process.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub storage_root: PathBuf,
    /// Row limit per chunk.
    pub max_chunk_height: u32,
    /// Encoding quality for JPEG chunks.
    pub quality: Quality,
}

impl RunConfig {
    /// Build a RunConfig from the validated application config.
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            storage_root: config.storage.root.clone(),
            max_chunk_height: config.processing.max_height,
            quality: Quality::new(config.processing.jpeg_quality),
        }
    }
}

/// One split request, after the host has mapped its input onto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRequest {
    /// Full source URL, trusted host already applied.
    pub url: String,
    pub prefix: String,
    /// 0 = no width crop.
    pub max_width: u32,
    /// 0 = all chunks.
    pub max_chunks: u32,
    pub create_archive: bool,
}

impl SplitRequest {
    pub fn validate(&self) -> Result<(), ProcessError> {
        if self.url.is_empty() {
            return Err(ProcessError::Validation("URL is required".into()));
        }
        if self.prefix.is_empty() {
            return Err(ProcessError::Validation("images_prefix is required".into()));
        }
        if !is_valid_prefix(&self.prefix) {
            return Err(ProcessError::Validation(
                "images_prefix contains invalid characters".into(),
            ));
        }
        Ok(())
    }
}

/// Join the trusted base host and a caller-supplied path.
///
/// `url_host` ends with `/`; a leading `/` on `path` is dropped so the two
/// never produce `//`.
pub fn source_url(url_host: &str, path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    format!("{}{}", url_host, path.trim_start_matches('/'))
}

/// Create a fresh run directory under `root` named after `started_secs`.
///
/// Falls back to `{secs}-1`, `{secs}-2`, … while the name is taken.
pub fn create_run_dir(root: &Path, started_secs: u64) -> Result<PathBuf, ProcessError> {
    let base = started_secs.to_string();
    let mut candidate = root.join(&base);
    for suffix in 1..=MAX_RUN_DIR_SUFFIX {
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                candidate = root.join(format!("{base}-{suffix}"));
            }
            Err(source) => {
                return Err(ProcessError::RunDir {
                    path: candidate,
                    source,
                });
            }
        }
    }
    Err(ProcessError::RunDir {
        path: candidate,
        source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            "no free run directory name left for this second",
        ),
    })
}

/// `"Successfully split image into N parts"` plus the archive and strategy
/// suffixes.
pub fn success_message(parts: usize, archived: bool, external_tools: bool) -> String {
    let mut message = format!("Successfully split image into {parts} parts");
    if archived {
        message.push_str(" and created zip file");
    }
    if external_tools {
        message.push_str(" using CLI tools");
    }
    message
}

/// `path` relative to `root`, `/`-separated.
fn relative_to(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Execute one run with the given backend.
///
/// Validation happens before anything touches the storage root. After the
/// run directory exists, any failure aborts the run with the originating
/// error and the directory is left in place.
pub fn run(
    backend: &dyn SplitBackend,
    config: &RunConfig,
    request: &SplitRequest,
) -> Result<ProcessingResult, ProcessError> {
    request.validate()?;

    let run_dir = create_run_dir(&config.storage_root, unix_now())?;
    info!(
        url = %request.url,
        prefix = %request.prefix,
        run_dir = %run_dir.display(),
        "starting split run"
    );

    let result = run_in_dir(backend, config, request, &run_dir);
    if let Err(e) = &result {
        error!(
            kind = e.kind(),
            error = %e,
            run_dir = %run_dir.display(),
            "split run failed, run directory kept"
        );
    }
    result
}

fn run_in_dir(
    backend: &dyn SplitBackend,
    config: &RunConfig,
    request: &SplitRequest,
    run_dir: &Path,
) -> Result<ProcessingResult, ProcessError> {
    let source = fetch_source(backend, &request.url, run_dir)?;
    debug!(path = %source.local_path.display(), format = ?source.format, "fetched source");

    let (width, height) = get_dimensions(backend, &source.local_path)?;
    info!(width, height, "probed source dimensions");

    let chunks = plan_chunks(
        width,
        height,
        config.max_chunk_height,
        request.max_width,
        request.max_chunks,
        &request.prefix,
    )?;
    info!(chunks = chunks.len(), "planned chunks");

    let paths = render_chunks(backend, &source, run_dir, &chunks, config.quality)?;

    // `zip` refuses to create an archive with no entries.
    let archive = if request.create_archive && !paths.is_empty() {
        let archive_path = run_dir.join(archive_file_name(&request.prefix));
        archive_chunks(backend, &archive_path, &paths)?;
        info!(path = %archive_path.display(), "created archive");
        Some(ArchiveResult {
            relative_path: relative_to(&config.storage_root, &archive_path),
            absolute_path: absolute(&archive_path),
        })
    } else {
        None
    };

    let chunks: Vec<ChunkResult> = chunks
        .into_iter()
        .zip(paths)
        .map(|(spec, path)| ChunkResult {
            spec,
            relative_path: relative_to(&config.storage_root, &path),
            absolute_path: absolute(&path),
        })
        .collect();

    Ok(ProcessingResult {
        status: "success",
        message: success_message(
            chunks.len(),
            archive.is_some(),
            backend.uses_external_tools(),
        ),
        archive,
        chunks,
    })
}
