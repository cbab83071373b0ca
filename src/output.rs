//! CLI output formatting for `split`.
//!
//! # Output Format
//!
//! ```text
//! https://images.example.com/uploads/tall.png
//! 001 chapter_01.jpg (1500x5000, rows 0-5000)
//!     Path: 1700000000/chapter_01.jpg
//! 002 chapter_02.jpg (1500x5000, rows 5000-10000)
//!     Path: 1700000000/chapter_02.jpg
//! 003 chapter_03.jpg (1500x2000, rows 10000-12000)
//!     Path: 1700000000/chapter_03.jpg
//! Archive: 1700000000/chapter.zip
//!
//! Successfully split image into 3 parts and created zip file
//! ```
//!
//! Paths are relative to the storage root, as the HTTP response reports them.
//!
//! # Architecture
//!
//! [`format_split_result`] returns `Vec<String>` for testability and
//! [`print_split_result`] writes it to stdout. The format function is pure:
//! no I/O, no side effects.

use crate::types::{ChunkSpec, ProcessingResult};

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: u32) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// ```text
/// 001 chapter_01.jpg (1500x5000, rows 0-5000)
/// ```
fn chunk_line(spec: &ChunkSpec) -> String {
    format!(
        "{} {} ({}x{}, rows {}-{})",
        format_index(spec.index),
        spec.file_name,
        spec.out_width,
        spec.height(),
        spec.start_y,
        spec.end_y
    )
}

/// Format the result of one run started from `source_url`.
pub fn format_split_result(source_url: &str, result: &ProcessingResult) -> Vec<String> {
    let mut lines = vec![source_url.to_string()];

    for chunk in &result.chunks {
        lines.push(chunk_line(&chunk.spec));
        lines.push(format!("{}Path: {}", indent(1), chunk.relative_path));
    }

    if let Some(archive) = &result.archive {
        lines.push(format!("Archive: {}", archive.relative_path));
    }

    lines.push(String::new());
    lines.push(result.message.clone());
    lines
}

pub fn print_split_result(source_url: &str, result: &ProcessingResult) {
    for line in format_split_result(source_url, result) {
        println!("{}", line);
    }
}
