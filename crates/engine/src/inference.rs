//! Per-tile inference functions.
//!
//! The scheduler and executor see only a job-type tag and an opaque
//! [`TileInference`]; the built-in implementations are deterministic
//! threshold passes, and a real model backend can be registered per tag
//! without touching either.

use std::collections::HashMap;
use std::sync::Arc;

use image::{GrayImage, RgbImage};

use slidemill_core::config::Settings;
use slidemill_core::error::CoreError;
use slidemill_core::job::JobType;

/// One inference call over a padded tile.
///
/// Runs on a blocking worker thread; implementations may block but must
/// not touch scheduler or store state. The returned mask must have the
/// tile's dimensions.
pub trait TileInference: Send + Sync {
    fn apply(&self, tile: &RgbImage) -> Result<GrayImage, CoreError>;
}

/// Deterministic SEGMENT_CELLS fallback: luminance thresholded at the
/// tile mean.
pub struct MeanThresholdSegmenter;

impl TileInference for MeanThresholdSegmenter {
    fn apply(&self, tile: &RgbImage) -> Result<GrayImage, CoreError> {
        let gray = image::imageops::grayscale(tile);
        let sum: u64 = gray.pixels().map(|p| u64::from(p.0[0])).sum();
        let count = u64::from(gray.width()) * u64::from(gray.height());
        let mean = if count == 0 { 0 } else { (sum / count) as u8 };
        Ok(binarize(&gray, mean))
    }
}

/// TISSUE_MASK: luminance thresholded by Otsu's method.
pub struct OtsuTissueMask;

impl TileInference for OtsuTissueMask {
    fn apply(&self, tile: &RgbImage) -> Result<GrayImage, CoreError> {
        let gray = image::imageops::grayscale(tile);
        let threshold = otsu_threshold(&gray);
        Ok(binarize(&gray, threshold))
    }
}

fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    let mut mask = GrayImage::new(gray.width(), gray.height());
    for (src, dst) in gray.pixels().zip(mask.pixels_mut()) {
        dst.0[0] = if src.0[0] > threshold { 255 } else { 0 };
    }
    mask
}

/// Otsu's threshold: maximize between-class variance over the 8-bit
/// luminance histogram.
fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for p in gray.pixels() {
        histogram[p.0[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }

    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &n)| v as f64 * n as f64)
        .sum();

    let mut best = (0u8, 0.0f64);
    let mut background_count = 0u64;
    let mut background_sum = 0.0f64;
    for t in 0..256 {
        background_count += histogram[t];
        if background_count == 0 {
            continue;
        }
        let foreground_count = total - background_count;
        if foreground_count == 0 {
            break;
        }
        background_sum += t as f64 * histogram[t] as f64;

        let mean_bg = background_sum / background_count as f64;
        let mean_fg = (weighted_total - background_sum) / foreground_count as f64;
        let variance = background_count as f64 * foreground_count as f64
            * (mean_bg - mean_fg)
            * (mean_bg - mean_fg);
        if variance > best.1 {
            best = (t as u8, variance);
        }
    }
    best.0
}

/// Maps job-type tags to inference implementations.
pub struct InferenceRegistry {
    custom: HashMap<JobType, Arc<dyn TileInference>>,
    enable_instanseg: bool,
}

impl InferenceRegistry {
    pub fn new(settings: &Settings) -> Self {
        Self {
            custom: HashMap::new(),
            enable_instanseg: settings.enable_instanseg,
        }
    }

    /// Register an implementation for a tag, replacing the built-in one.
    pub fn register(&mut self, job_type: JobType, inference: Arc<dyn TileInference>) {
        self.custom.insert(job_type, inference);
    }

    /// Resolve the implementation for a job's tag.
    pub fn resolve(&self, job_type: JobType) -> Arc<dyn TileInference> {
        if let Some(custom) = self.custom.get(&job_type) {
            return Arc::clone(custom);
        }
        match job_type {
            JobType::SegmentCells => {
                if self.enable_instanseg {
                    tracing::warn!(
                        "ENABLE_INSTANTSEG is set but no segmenter is registered; \
                         using the threshold fallback"
                    );
                }
                Arc::new(MeanThresholdSegmenter)
            }
            JobType::TissueMask => Arc::new(OtsuTissueMask),
        }
    }
}
