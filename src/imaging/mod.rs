//! Image work for a split run: fetch, identify, crop, archive.
//!
//! Two interchangeable backends implement [`SplitBackend`]:
//!
//! | Operation | [`RustBackend`] | [`CliBackend`] |
//! |---|---|---|
//! | **Fetch** | `reqwest` blocking GET | `curl --fail` |
//! | **Identify** | `image` header read | `vipsheader` / `identify` |
//! | **Render** | decode once, copy regions, encode | one `vips crop` / `convert` per chunk |
//! | **Archive** | `zip` crate, deflate | `zip -j` |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for chunk layout (unit testable)
//! - **Parameters**: Data structures describing backend operations
//! - **Backend**: [`SplitBackend`] trait + both implementations
//! - **Operations**: High-level functions combining the plan with a backend

pub mod backend;
mod calculations;
pub mod cli_backend;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, SplitBackend};
pub use calculations::{PlanError, chunk_count, effective_width, plan_chunks};
pub use cli_backend::{CliBackend, Toolkit};
pub use operations::{archive_chunks, fetch_source, get_dimensions, render_chunks};
pub use params::{ArchiveParams, CropParams, Quality, RenderParams};
pub use rust_backend::RustBackend;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which backend family executes runs. Chosen once per process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// In-process codecs ([`RustBackend`]).
    #[default]
    Native,
    /// External command-line tools ([`CliBackend`]).
    Cli,
}

/// Build the backend for a strategy.
///
/// `toolkit` only matters for [`Strategy::Cli`]; `fetch_timeout` only for
/// [`Strategy::Native`] (curl runs without a deadline).
pub fn create_backend(
    strategy: Strategy,
    toolkit: Toolkit,
    fetch_timeout: Duration,
) -> Box<dyn SplitBackend> {
    match strategy {
        Strategy::Native => Box::new(RustBackend::with_fetch_timeout(fetch_timeout)),
        Strategy::Cli => Box::new(CliBackend::new(toolkit)),
    }
}
