//! File naming for chunks, archives and downloaded originals.
//!
//! Chunk names follow `{prefix}_{NN}.jpg`. The number is padded with a single
//! leading zero below 10 and written plainly from 10 on, so a 120-chunk run
//! produces `p_09.jpg`, `p_10.jpg`, …, `p_100.jpg`. Consumers sort on this, so
//! the rule is kept exactly as is rather than widened to a fixed width.
//!
//! Every chunk is named `.jpg`, including the PNG-encoded chunks of a PNG
//! source rendered in-process.

/// Base name (no extension) of the downloaded original inside a run directory.
pub const ORIGINAL_STEM: &str = "original_image";

/// Format a 1-based chunk index: `"01".."09"`, then `"10"`, `"11"`, ….
pub fn chunk_number(index: u32) -> String {
    if index < 10 {
        format!("0{index}")
    } else {
        index.to_string()
    }
}

/// File name of the chunk at `index` (1-based).
pub fn chunk_file_name(prefix: &str, index: u32) -> String {
    format!("{}_{}.jpg", prefix, chunk_number(index))
}

/// File name of the archive bundling a run's chunks.
pub fn archive_file_name(prefix: &str) -> String {
    format!("{prefix}.zip")
}

/// File name of the downloaded original for the given extension.
pub fn original_file_name(extension: &str) -> String {
    format!("{ORIGINAL_STEM}.{extension}")
}

/// Whether `prefix` uses only ASCII letters, digits and underscores.
///
/// The empty string passes; callers that require a prefix check emptiness
/// separately so they can report it with its own message.
pub fn is_valid_prefix(prefix: &str) -> bool {
    prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
