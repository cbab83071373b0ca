//! In-process split backend. Runs no external programs.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Fetch | `reqwest::blocking`, body streamed to disk with `Response::copy_to` |
//! | Identify | `image::ImageReader::into_dimensions` (header only) |
//! | Decode (JPEG, PNG) | `image` crate, format guessed from content |
//! | Chunk raster | `image::ImageBuffer::from_fn` over the decoded source |
//! | Encode | `JpegEncoder` (quality) or `PngEncoder`, matching the source format |
//! | Archive | `zip::ZipWriter`, deflate |

use super::backend::{BackendError, Dimensions, SplitBackend};
use super::params::{ArchiveParams, CropParams, RenderParams};
use crate::types::SourceFormat;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageBuffer, ImageReader, Pixel, RgbImage, RgbaImage};
use reqwest::blocking::Client;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use zip::CompressionMethod;
use zip::write::FileOptions;

/// Default timeout for one source download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// In-process backend using `reqwest`, `image` and `zip`.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend {
    fetch_timeout: Duration,
}

impl RustBackend {
    pub fn new() -> Self {
        Self::with_fetch_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_fetch_timeout(fetch_timeout: Duration) -> Self {
        Self { fetch_timeout }
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded source, kept in the pixel layout its encoder wants.
///
/// JPEG output has no alpha channel, PNG keeps it.
enum Raster {
    Rgb(RgbImage),
    Rgba(RgbaImage),
}

impl Raster {
    fn dimensions(&self) -> (u32, u32) {
        match self {
            Raster::Rgb(img) => img.dimensions(),
            Raster::Rgba(img) => img.dimensions(),
        }
    }
}

/// Load and decode an image from disk once for the whole run.
fn load_image(path: &Path, format: SourceFormat) -> Result<Raster, BackendError> {
    let img = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| BackendError::Render(format!("failed to open {}: {e}", path.display())))?
        .decode()
        .map_err(|e| {
            BackendError::Render(format!("failed to decode {}: {e}", path.display()))
        })?;

    Ok(match format {
        SourceFormat::Png => Raster::Rgba(img.to_rgba8()),
        SourceFormat::Jpeg => Raster::Rgb(img.to_rgb8()),
    })
}

/// Copy one rectangle into a fresh raster of the crop's size.
fn copy_region<P: Pixel>(
    source: &ImageBuffer<P, Vec<P::Subpixel>>,
    crop: &CropParams,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    ImageBuffer::from_fn(crop.width, crop.height, |x, y| {
        *source.get_pixel(crop.x + x, crop.y + y)
    })
}

fn check_bounds(crop: &CropParams, (width, height): (u32, u32)) -> Result<(), BackendError> {
    let fits_x = crop.x.checked_add(crop.width).is_some_and(|r| r <= width);
    let fits_y = crop.y.checked_add(crop.height).is_some_and(|b| b <= height);
    if crop.width == 0 || crop.height == 0 || !fits_x || !fits_y {
        return Err(BackendError::Render(format!(
            "crop {}x{}+{}+{} outside source {}x{}",
            crop.width, crop.height, crop.x, crop.y, width, height
        )));
    }
    Ok(())
}

/// Encode a chunk to `path`: PNG for PNG sources, JPEG otherwise.
fn save_image(img: DynamicImage, path: &Path, params: &RenderParams) -> Result<(), BackendError> {
    let file = File::create(path).map_err(|e| {
        BackendError::Render(format!("failed to create output file {}: {e}", path.display()))
    })?;
    let mut writer = BufWriter::new(file);

    let encoded = match params.format {
        SourceFormat::Png => img.write_with_encoder(PngEncoder::new(&mut writer)),
        SourceFormat::Jpeg => img.write_with_encoder(JpegEncoder::new_with_quality(
            &mut writer,
            params.quality.value() as u8,
        )),
    };
    encoded.map_err(|e| {
        BackendError::Render(format!("failed to save split image {}: {e}", path.display()))
    })?;

    writer
        .flush()
        .map_err(|e| BackendError::Render(format!("failed to flush {}: {e}", path.display())))
}

fn render_crop(raster: &Raster, crop: &CropParams, params: &RenderParams) -> Result<(), BackendError> {
    check_bounds(crop, raster.dimensions())?;
    let chunk = match raster {
        Raster::Rgb(img) => DynamicImage::ImageRgb8(copy_region(img, crop)),
        Raster::Rgba(img) => DynamicImage::ImageRgba8(copy_region(img, crop)),
    };
    save_image(chunk, &crop.output, params)
}

/// Stream one file into the archive under its base name.
fn add_file_to_zip<W: Write + std::io::Seek>(
    zip: &mut zip::ZipWriter<W>,
    path: &Path,
    options: FileOptions,
) -> Result<(), BackendError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BackendError::Archive(format!("invalid entry path {}", path.display())))?;

    let mut file = File::open(path)
        .map_err(|e| BackendError::Archive(format!("failed to open {}: {e}", path.display())))?;

    zip.start_file(name, options)
        .map_err(|e| BackendError::Archive(format!("failed to add {name}: {e}")))?;
    std::io::copy(&mut file, zip)
        .map_err(|e| BackendError::Archive(format!("failed to add {name}: {e}")))?;
    Ok(())
}

impl SplitBackend for RustBackend {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), BackendError> {
        let client = Client::builder()
            .timeout(self.fetch_timeout)
            .build()
            .map_err(|e| BackendError::Fetch(format!("failed to create client: {e}")))?;

        let mut resp = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| BackendError::Fetch(e.to_string()))?;

        let file = File::create(dest).map_err(|e| {
            BackendError::Fetch(format!("failed to create output file {}: {e}", dest.display()))
        })?;
        let mut writer = BufWriter::new(file);
        let bytes = resp
            .copy_to(&mut writer)
            .map_err(|e| BackendError::Fetch(format!("failed to save image: {e}")))?;
        writer
            .flush()
            .map_err(|e| BackendError::Fetch(format!("failed to save image: {e}")))?;

        debug!(url, bytes, dest = %dest.display(), "downloaded source");
        Ok(())
    }

    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let (width, height) = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| BackendError::Probe(format!("{}: {e}", path.display())))?
            .into_dimensions()
            .map_err(|e| BackendError::Probe(format!("{}: {e}", path.display())))?;
        Ok(Dimensions { width, height })
    }

    fn render(&self, params: &RenderParams) -> Result<(), BackendError> {
        let raster = load_image(&params.source, params.format)?;
        for crop in &params.crops {
            render_crop(&raster, crop, params)?;
            debug!(output = %crop.output.display(), "rendered chunk");
        }
        Ok(())
    }

    fn archive(&self, params: &ArchiveParams) -> Result<(), BackendError> {
        // Dropping a ZipWriter finalizes it, so a failed write would still
        // leave a readable archive. Build it under a sibling name and move
        // it into place only once complete.
        let partial = partial_path(&params.output);
        let result = write_archive(&partial, &params.entries).and_then(|()| {
            std::fs::rename(&partial, &params.output).map_err(|e| {
                BackendError::Archive(format!("{}: {e}", params.output.display()))
            })
        });
        if result.is_err() {
            let _ = std::fs::remove_file(&partial);
        }
        result
    }
}

/// `chapter.zip` -> `chapter.zip.partial`, in the same directory.
fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

fn write_archive(path: &Path, entries: &[PathBuf]) -> Result<(), BackendError> {
    let file = File::create(path)
        .map_err(|e| BackendError::Archive(format!("{}: {e}", path.display())))?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        add_file_to_zip(&mut zip, entry, options)?;
    }

    let mut writer = zip
        .finish()
        .map_err(|e| BackendError::Archive(format!("failed to close zip writer: {e}")))?;
    writer
        .flush()
        .map_err(|e| BackendError::Archive(format!("failed to close zip writer: {e}")))
}
