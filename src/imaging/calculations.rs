//! Pure chunk-layout calculations.
//!
//! All functions here are pure and testable without any I/O or images.

use crate::naming::chunk_file_name;
use crate::types::ChunkSpec;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("max chunk height must be greater than zero")]
    ZeroChunkHeight,
}

/// Number of chunks needed to cover `height` rows.
///
/// Ceiling division, done in `u64` so heights near `u32::MAX` cannot overflow.
///
/// # Examples
/// ```
/// # use image_splitter::imaging::chunk_count;
/// assert_eq!(chunk_count(12000, 5000).unwrap(), 3);
/// assert_eq!(chunk_count(10000, 5000).unwrap(), 2);
/// assert_eq!(chunk_count(0, 5000).unwrap(), 0);
/// ```
pub fn chunk_count(height: u32, max_chunk_height: u32) -> Result<u32, PlanError> {
    if max_chunk_height == 0 {
        return Err(PlanError::ZeroChunkHeight);
    }
    let count = (height as u64 + max_chunk_height as u64 - 1) / max_chunk_height as u64;
    Ok(count as u32)
}

/// Output width after applying the requested maximum.
///
/// `requested == 0` means "no crop". A request at or above the source width is
/// also a no-op.
pub fn effective_width(width: u32, requested: u32) -> u32 {
    if requested > 0 && requested < width {
        requested
    } else {
        width
    }
}

/// Left edge of the width crop.
///
/// Always 0: narrowed chunks keep the left part of the source. Consumers of
/// the original service rely on this, so no centering offset is applied.
pub fn crop_x_offset(_width: u32, _out_width: u32) -> u32 {
    0
}

/// Plan the ordered chunk list for an image.
///
/// # Arguments
/// * `width`, `height` - Source dimensions
/// * `max_chunk_height` - Row limit per chunk, must be > 0
/// * `max_width` - Requested width cap, 0 = none
/// * `max_chunks` - Requested chunk cap, 0 = none; keeps the top-most chunks
/// * `prefix` - Chunk file-name prefix
///
/// # Returns
/// * Chunks from top to bottom, contiguous, the last one possibly shorter
pub fn plan_chunks(
    width: u32,
    height: u32,
    max_chunk_height: u32,
    max_width: u32,
    max_chunks: u32,
    prefix: &str,
) -> Result<Vec<ChunkSpec>, PlanError> {
    let mut count = chunk_count(height, max_chunk_height)?;
    if max_chunks > 0 && max_chunks < count {
        count = max_chunks;
    }

    let out_width = effective_width(width, max_width);
    let x_offset = crop_x_offset(width, out_width);

    let chunks = (0..count)
        .map(|i| {
            let start_y = i * max_chunk_height;
            let end_y = start_y.saturating_add(max_chunk_height).min(height);
            let index = i + 1;
            ChunkSpec {
                index,
                start_y,
                end_y,
                x_offset,
                out_width,
                file_name: chunk_file_name(prefix, index),
            }
        })
        .collect();

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(chunks: &[ChunkSpec]) -> Vec<(u32, u32)> {
        chunks.iter().map(|c| (c.start_y, c.end_y)).collect()
    }

    // =========================================================================
    // chunk_count tests
    // =========================================================================

    #[test]
    fn count_rounds_up() {
        assert_eq!(chunk_count(12000, 5000).unwrap(), 3);
        assert_eq!(chunk_count(5001, 5000).unwrap(), 2);
    }

    #[test]
    fn count_exact_multiple() {
        assert_eq!(chunk_count(15000, 5000).unwrap(), 3);
    }

    #[test]
    fn count_shorter_than_limit() {
        assert_eq!(chunk_count(1, 5000).unwrap(), 1);
    }

    #[test]
    fn count_zero_height() {
        assert_eq!(chunk_count(0, 5000).unwrap(), 0);
    }

    #[test]
    fn count_zero_limit_is_an_error() {
        assert_eq!(chunk_count(100, 0), Err(PlanError::ZeroChunkHeight));
    }

    #[test]
    fn count_does_not_overflow() {
        assert_eq!(chunk_count(u32::MAX, u32::MAX).unwrap(), 1);
        assert_eq!(chunk_count(u32::MAX, 2).unwrap(), u32::MAX / 2 + 1);
    }

    // =========================================================================
    // effective_width tests
    // =========================================================================

    #[test]
    fn width_cap_narrower_than_source() {
        assert_eq!(effective_width(2000, 1500), 1500);
    }

    #[test]
    fn width_cap_zero_means_none() {
        assert_eq!(effective_width(2000, 0), 2000);
    }

    #[test]
    fn width_cap_at_or_above_source_is_ignored() {
        assert_eq!(effective_width(2000, 2000), 2000);
        assert_eq!(effective_width(2000, 4000), 2000);
    }

    // =========================================================================
    // plan_chunks tests
    // =========================================================================

    #[test]
    fn plan_tall_image_three_chunks() {
        let chunks = plan_chunks(800, 12000, 5000, 0, 0, "scan").unwrap();
        assert_eq!(
            ranges(&chunks),
            vec![(0, 5000), (5000, 10000), (10000, 12000)]
        );
        assert!(chunks.iter().all(|c| c.out_width == 800 && c.x_offset == 0));
    }

    #[test]
    fn plan_max_chunks_drops_the_tail() {
        let chunks = plan_chunks(800, 12000, 5000, 0, 2, "scan").unwrap();
        assert_eq!(ranges(&chunks), vec![(0, 5000), (5000, 10000)]);
    }

    #[test]
    fn plan_max_chunks_above_count_is_ignored() {
        let chunks = plan_chunks(800, 12000, 5000, 0, 10, "scan").unwrap();
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn plan_width_crop_is_left_aligned() {
        let chunks = plan_chunks(2000, 12000, 5000, 1500, 0, "scan").unwrap();
        assert!(chunks.iter().all(|c| c.out_width == 1500 && c.x_offset == 0));
    }

    #[test]
    fn plan_names_and_indices() {
        let chunks = plan_chunks(100, 1200, 100, 0, 0, "p").unwrap();
        let names: Vec<&str> = chunks.iter().map(|c| c.file_name.as_str()).collect();
        assert_eq!(names[0], "p_01.jpg");
        assert_eq!(names[8], "p_09.jpg");
        assert_eq!(names[9], "p_10.jpg");
        assert_eq!(names[11], "p_12.jpg");
        let indices: Vec<u32> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn plan_single_short_chunk() {
        let chunks = plan_chunks(640, 480, 5000, 0, 0, "p").unwrap();
        assert_eq!(ranges(&chunks), vec![(0, 480)]);
    }

    #[test]
    fn plan_zero_limit_is_an_error() {
        assert_eq!(
            plan_chunks(640, 480, 0, 0, 0, "p"),
            Err(PlanError::ZeroChunkHeight)
        );
    }

    #[test]
    fn plan_tiles_every_height_exactly() {
        for height in [1u32, 2, 99, 100, 101, 4999, 5000, 5001, 12000, 33333] {
            for limit in [1u32, 7, 100, 5000] {
                let chunks = plan_chunks(10, height, limit, 0, 0, "t").unwrap();
                assert_eq!(chunks.len() as u32, chunk_count(height, limit).unwrap());

                let mut expected_start = 0;
                for c in &chunks {
                    assert_eq!(c.start_y, expected_start, "gap at h={height} l={limit}");
                    assert!(c.end_y > c.start_y);
                    assert!(c.height() <= limit);
                    expected_start = c.end_y;
                }
                assert_eq!(expected_start, height, "coverage at h={height} l={limit}");
            }
        }
    }
}
