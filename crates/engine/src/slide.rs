//! Input readers for flat images and pyramid slides.
//!
//! Pyramid formats (`.svs`, `.tif`, `.tiff`) are enumerated page by page;
//! the reader records the level-0 dimensions and decodes the deepest
//! level whose pixel count fits the working budget. Everything else is
//! decoded as a single flat image.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;

use slidemill_core::error::CoreError;

/// Working budget for a decoded level, in pixels.
///
/// Level 0 of a gigapixel slide cannot be held raw in memory; tiling
/// runs against the deepest level that fits this budget instead.
pub const MAX_LEVEL_PIXELS: u64 = 64_000_000;

/// One decoded level of an input image, plus pyramid metadata.
pub struct SlideImage {
    pub pixels: Arc<RgbImage>,
    /// Index of the decoded level (0 for flat images).
    pub level: usize,
    /// Full-resolution dimensions of the input.
    pub level0_width: u32,
    pub level0_height: u32,
}

impl SlideImage {
    /// Open an input file, selecting the decode path by extension.
    ///
    /// A pyramid container that fails to parse falls back to the flat
    /// decoder, mirroring a missing-slide-library deployment.
    pub fn open(path: &Path, max_level_pixels: u64) -> Result<SlideImage, CoreError> {
        if is_pyramid_extension(path) {
            match open_pyramid(path, max_level_pixels) {
                Ok(slide) => return Ok(slide),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "Pyramid decode failed, falling back to flat decode"
                    );
                }
            }
        }
        open_flat(path)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

fn is_pyramid_extension(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("svs" | "tif" | "tiff")
    )
}

fn open_flat(path: &Path) -> Result<SlideImage, CoreError> {
    let decoded = image::open(path)
        .map_err(|e| CoreError::Invalid(format!("cannot decode input image: {e}")))?
        .to_rgb8();
    let (w, h) = decoded.dimensions();
    Ok(SlideImage {
        pixels: Arc::new(decoded),
        level: 0,
        level0_width: w,
        level0_height: h,
    })
}

fn open_pyramid(path: &Path, max_level_pixels: u64) -> Result<SlideImage, CoreError> {
    let file = File::open(path)
        .map_err(|e| CoreError::Internal(format!("cannot open input file: {e}")))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| CoreError::Invalid(format!("not a TIFF container: {e}")))?;

    // Page 0 is the full-resolution level in pyramid TIFF/SVS layouts.
    let mut levels = vec![dims(&mut decoder)?];
    while decoder.more_images() {
        decoder
            .next_image()
            .map_err(|e| CoreError::Invalid(format!("broken pyramid page: {e}")))?;
        levels.push(dims(&mut decoder)?);
    }

    let (level0_width, level0_height) = levels[0];
    let level = select_level(&levels, max_level_pixels);

    decoder
        .seek_to_image(level)
        .map_err(|e| CoreError::Internal(format!("cannot seek pyramid level {level}: {e}")))?;
    let (w, h) = dims(&mut decoder)?;
    let color = decoder
        .colortype()
        .map_err(|e| CoreError::Invalid(format!("unreadable color type: {e}")))?;
    let data = decoder
        .read_image()
        .map_err(|e| CoreError::Invalid(format!("cannot decode pyramid level {level}: {e}")))?;
    let pixels = to_rgb(data, color, w, h)?;

    tracing::debug!(
        path = %path.display(),
        level,
        width = w,
        height = h,
        level0_width,
        level0_height,
        "Pyramid level selected"
    );

    Ok(SlideImage {
        pixels: Arc::new(pixels),
        level,
        level0_width,
        level0_height,
    })
}

fn dims<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<(u32, u32), CoreError> {
    decoder
        .dimensions()
        .map_err(|e| CoreError::Invalid(format!("unreadable page dimensions: {e}")))
}

/// Deepest (highest-resolution) level within the pixel budget, or the
/// smallest level when even the coarsest exceeds it.
fn select_level(levels: &[(u32, u32)], max_level_pixels: u64) -> usize {
    let pixel_count = |&(w, h): &(u32, u32)| u64::from(w) * u64::from(h);
    levels
        .iter()
        .enumerate()
        .filter(|(_, d)| pixel_count(d) <= max_level_pixels)
        .max_by_key(|(_, d)| pixel_count(d))
        .map(|(i, _)| i)
        .unwrap_or_else(|| {
            levels
                .iter()
                .enumerate()
                .min_by_key(|(_, d)| pixel_count(d))
                .map(|(i, _)| i)
                .expect("pyramid has at least one level")
        })
}

fn to_rgb(
    data: DecodingResult,
    color: ColorType,
    width: u32,
    height: u32,
) -> Result<RgbImage, CoreError> {
    let unsupported =
        || CoreError::Invalid(format!("unsupported TIFF color type: {color:?}"));

    let bytes: Vec<u8> = match data {
        DecodingResult::U8(raw) => raw,
        DecodingResult::U16(raw) => raw.into_iter().map(|v| (v >> 8) as u8).collect(),
        _ => return Err(unsupported()),
    };

    let expected = |channels: usize| width as usize * height as usize * channels;
    let rgb: Vec<u8> = match color {
        ColorType::RGB(_) if bytes.len() == expected(3) => bytes,
        ColorType::RGBA(_) if bytes.len() == expected(4) => bytes
            .chunks_exact(4)
            .flat_map(|p| [p[0], p[1], p[2]])
            .collect(),
        ColorType::Gray(_) if bytes.len() == expected(1) => {
            bytes.into_iter().flat_map(|v| [v, v, v]).collect()
        }
        _ => return Err(unsupported()),
    };

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| CoreError::Internal("decoded pixel buffer has the wrong size".to_string()))
}
