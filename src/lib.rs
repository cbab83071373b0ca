//! # Image Splitter
//!
//! Splits oversized images, such as very tall scans, into bounded-height
//! chunks that size-limited viewers can display, and optionally bundles the
//! chunks into a zip archive.
//!
//! # Architecture: One Linear Pipeline
//!
//! Every run moves strictly forward through five steps:
//!
//! ```text
//! 1. Fetch     url        →  <run>/original_image.{jpg,png}
//! 2. Probe     original   →  (width, height)
//! 3. Plan      dimensions →  [ChunkSpec]           (pure)
//! 4. Render    plan       →  <run>/{prefix}_NN.jpg
//! 5. Archive   chunks     →  <run>/{prefix}.zip    (optional)
//! ```
//!
//! Steps 1, 2, 4 and 5 go through the [`imaging::SplitBackend`] trait; the
//! plan is a pure function, so chunk layout is tested without any image.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`process`] | The pipeline: run directory, step sequencing, result assembly |
//! | [`imaging`] | Backend trait, in-process and external-tool backends, chunk planner |
//! | [`server`] | `POST /split-image` over axum, basic auth, graceful shutdown |
//! | [`config`] | Layered `config.toml` loading, merging, and validation |
//! | [`types`] | Per-run data model (`ImageSource`, `ChunkSpec`, `ProcessingResult`) |
//! | [`naming`] | `{prefix}_NN.jpg` chunk names and prefix validation |
//! | [`output`] | CLI output formatting for `split` |
//! | [`logging`] | `tracing` subscriber setup, text or JSON |
//!
//! # Design Decisions
//!
//! ## Two Interchangeable Backends
//!
//! [`imaging::RustBackend`] does everything in-process with `reqwest`,
//! `image` and `zip`. [`imaging::CliBackend`] drives `curl`, libvips or
//! ImageMagick, and `zip`, for hosts where those tools are already tuned or
//! where the source images exceed what an in-memory decode can hold. The
//! choice is made once at startup and handed to every run as a
//! `&dyn SplitBackend`.
//!
//! ## No Shared Mutable State Between Runs
//!
//! A run gets an immutable [`process::RunConfig`] and a backend reference.
//! Nothing else is shared, so the server runs each request on its own
//! blocking task without locks.
//!
//! ## Left-Aligned Width Crop
//!
//! When a maximum width narrows the output, chunks keep the left part of the
//! source. Existing consumers depend on this.
//!
//! ## Runs Are Kept
//!
//! Run directories, including those of failed runs, are never removed. The
//! returned paths point into them, and a failed run's directory is the first
//! thing to look at when debugging.

pub mod config;
pub mod imaging;
pub mod logging;
pub mod naming;
pub mod output;
pub mod process;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
