//! Artifact output for one job: tile masks, the stitched preview, the
//! manifest, and the download bundle.
//!
//! Write order is part of the completion contract: every mask and the
//! preview are flushed to disk before `manifest.json` appears, and the
//! zip bundle is assembled under a temporary name and renamed into
//! place.

use std::fs::File;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{GrayImage, RgbImage, RgbaImage};
use zip::write::SimpleFileOptions;

use slidemill_core::error::CoreError;
use slidemill_core::job::{ArtifactEntry, Manifest};
use slidemill_core::tiling::Tile;

/// Longest edge of the stitched preview.
pub const PREVIEW_MAX_DIM: u32 = 2048;

/// Opacity of the mask tint over the source thumbnail.
const OVERLAY_ALPHA: u8 = 120;

pub const PREVIEW_NAME: &str = "preview.png";
pub const MANIFEST_NAME: &str = "manifest.json";
pub const ARCHIVE_NAME: &str = "artifacts.zip";

pub fn mask_filename(row: u32, col: u32) -> String {
    format!("mask_{row}_{col}.png")
}

/// Write one tile's cropped mask and return its manifest entry.
pub fn write_mask(
    dir: &Path,
    row: u32,
    col: u32,
    mask: &GrayImage,
) -> Result<ArtifactEntry, CoreError> {
    let name = mask_filename(row, col);
    let path = dir.join(&name);
    mask.save(&path)
        .map_err(|e| CoreError::Internal(format!("cannot write {name}: {e}")))?;
    entry(dir, name)
}

/// Stitch tile masks over a downscaled source thumbnail.
///
/// Masked pixels are tinted with the job-type color at a fixed opacity;
/// unmasked pixels show the thumbnail unchanged.
pub fn compose_preview(
    source: &RgbImage,
    masks: &[(Tile, GrayImage)],
    tint: [u8; 3],
) -> RgbaImage {
    let (w, h) = source.dimensions();
    let longest = w.max(h).max(1);
    let scale = f64::from(PREVIEW_MAX_DIM.min(longest)) / f64::from(longest);
    let scaled = |v: u32| ((f64::from(v) * scale) as u32).max(1);

    let mut canvas = image::DynamicImage::ImageRgb8(image::imageops::resize(
        source,
        scaled(w),
        scaled(h),
        FilterType::Triangle,
    ))
    .to_rgba8();

    let alpha = f64::from(OVERLAY_ALPHA) / 255.0;
    for (tile, mask) in masks {
        let resized = image::imageops::resize(
            mask,
            scaled(tile.width),
            scaled(tile.height),
            FilterType::Nearest,
        );
        let origin_x = (f64::from(tile.x) * scale) as u32;
        let origin_y = (f64::from(tile.y) * scale) as u32;
        for (mx, my, m) in resized.enumerate_pixels() {
            if m.0[0] == 0 {
                continue;
            }
            let (px, py) = (origin_x + mx, origin_y + my);
            if px >= canvas.width() || py >= canvas.height() {
                continue;
            }
            let dst = canvas.get_pixel_mut(px, py);
            for c in 0..3 {
                let blended =
                    f64::from(dst.0[c]) * (1.0 - alpha) + f64::from(tint[c]) * alpha;
                dst.0[c] = blended.round() as u8;
            }
            dst.0[3] = 255;
        }
    }
    canvas
}

pub fn write_preview(dir: &Path, preview: &RgbaImage) -> Result<ArtifactEntry, CoreError> {
    let path = dir.join(PREVIEW_NAME);
    preview
        .save(&path)
        .map_err(|e| CoreError::Internal(format!("cannot write {PREVIEW_NAME}: {e}")))?;
    entry(dir, PREVIEW_NAME.to_string())
}

/// Flush every listed artifact to disk.
pub fn sync_all(dir: &Path, entries: &[ArtifactEntry]) -> Result<(), CoreError> {
    for artifact in entries {
        File::open(dir.join(&artifact.path))
            .and_then(|f| f.sync_all())
            .map_err(|e| CoreError::Internal(format!("cannot sync {}: {e}", artifact.path)))?;
    }
    Ok(())
}

/// Write `manifest.json`. Call only after [`sync_all`] has succeeded.
pub fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<(), CoreError> {
    let bytes = serde_json::to_vec_pretty(manifest)
        .map_err(|e| CoreError::Internal(format!("cannot encode manifest: {e}")))?;
    let path = dir.join(MANIFEST_NAME);
    std::fs::write(&path, bytes)
        .map_err(|e| CoreError::Internal(format!("cannot write {MANIFEST_NAME}: {e}")))?;
    File::open(&path)
        .and_then(|f| f.sync_all())
        .map_err(|e| CoreError::Internal(format!("cannot sync {MANIFEST_NAME}: {e}")))
}

/// Bundle the listed artifacts into `artifacts.zip`.
///
/// The archive is assembled under a temporary name and renamed into
/// place so consumers never observe a partial zip.
pub fn write_archive(dir: &Path, entries: &[ArtifactEntry]) -> Result<PathBuf, CoreError> {
    let tmp_path = dir.join(format!("{ARCHIVE_NAME}.tmp"));
    let final_path = dir.join(ARCHIVE_NAME);
    let io_err = |e: std::io::Error| CoreError::Internal(format!("cannot write archive: {e}"));
    let zip_err = |e: zip::result::ZipError| CoreError::Internal(format!("cannot write archive: {e}"));

    let mut writer = zip::ZipWriter::new(File::create(&tmp_path).map_err(io_err)?);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for artifact in entries {
        writer.start_file(artifact.path.as_str(), options).map_err(zip_err)?;
        let mut src = File::open(dir.join(&artifact.path)).map_err(io_err)?;
        std::io::copy(&mut src, &mut writer).map_err(io_err)?;
    }
    let file = writer.finish().map_err(zip_err)?;
    file.sync_all().map_err(io_err)?;

    std::fs::rename(&tmp_path, &final_path).map_err(io_err)?;
    Ok(final_path)
}

fn entry(dir: &Path, name: String) -> Result<ArtifactEntry, CoreError> {
    let bytes = std::fs::metadata(dir.join(&name))
        .map_err(|e| CoreError::Internal(format!("cannot stat {name}: {e}")))?
        .len();
    Ok(ArtifactEntry { path: name, bytes })
}
