//! Drives one admitted job from RUNNING to a terminal state.
//!
//! The executor owns mutation rights over exactly one job while it runs.
//! All pixel work happens on blocking worker threads; the async side
//! only sequences tiles, publishes progress, and observes cancellation
//! between tiles.

use std::sync::Arc;

use chrono::Utc;
use image::{GrayImage, RgbImage};
use tokio_util::sync::CancellationToken;

use slidemill_core::config::Settings;
use slidemill_core::error::CoreError;
use slidemill_core::job::{Job, JobState, JobType, Manifest};
use slidemill_core::tiling::{Tile, TileGrid};
use slidemill_store::{FileStore, Store};

use crate::artifacts;
use crate::inference::TileInference;
use crate::slide::{SlideImage, MAX_LEVEL_PIXELS};

/// Run an admitted job to completion and record its terminal state.
///
/// Never returns an error: failures are recorded on the job record and
/// surfaced through its event stream, not raised to the admission layer.
pub(crate) async fn run_job(
    store: Arc<Store>,
    files: Arc<FileStore>,
    settings: Arc<Settings>,
    inference: Arc<dyn TileInference>,
    job: Job,
    cancel: CancellationToken,
) {
    let job_id = job.id;
    match execute(&store, &files, &settings, inference, &job, &cancel).await {
        Ok(manifest) => {
            let tiles = manifest.tiles_total;
            let applied = store
                .transition(job_id, &[JobState::Running], JobState::Succeeded, |j| {
                    j.manifest = Some(manifest);
                })
                .await;
            match applied {
                Ok(_) => tracing::info!(job_id = %job_id, tiles, "Job succeeded"),
                Err(e) => tracing::error!(job_id = %job_id, error = %e, "Success transition rejected"),
            }
        }
        Err(err) => {
            let reason = err.to_string();
            tracing::warn!(job_id = %job_id, error = %reason, "Job failed");
            let applied = store
                .transition(job_id, &[JobState::Running], JobState::Failed, |j| {
                    j.error = Some(reason);
                })
                .await;
            if let Err(e) = applied {
                tracing::error!(job_id = %job_id, error = %e, "Failure transition rejected");
            }
        }
    }
}

async fn execute(
    store: &Store,
    files: &FileStore,
    settings: &Settings,
    inference: Arc<dyn TileInference>,
    job: &Job,
    cancel: &CancellationToken,
) -> Result<Manifest, CoreError> {
    let src = files.disk_path(job.file_id).await.ok_or_else(|| {
        CoreError::Internal(format!("input file {} is no longer registered", job.file_id))
    })?;

    let slide =
        tokio::task::spawn_blocking(move || SlideImage::open(&src, MAX_LEVEL_PIXELS))
            .await
            .map_err(join_error)??;

    let grid = TileGrid::compute(
        slide.width(),
        slide.height(),
        settings.tile_size,
        settings.tile_overlap,
    );
    if grid.is_empty() {
        return Err(CoreError::Invalid("input image has no pixels".to_string()));
    }
    let total = grid.len() as u32;
    store.update_progress(job.id, 0, total).await?;

    let job_dir = files.job_dir(job.id);
    std::fs::create_dir_all(&job_dir)
        .map_err(|e| CoreError::Internal(format!("cannot create results directory: {e}")))?;

    let mut entries = Vec::with_capacity(grid.len() + 1);
    let mut masks = Vec::with_capacity(grid.len());
    for (index, tile) in grid.tiles.iter().copied().enumerate() {
        // Cooperative only: a tile in flight is never interrupted.
        if cancel.is_cancelled() {
            return Err(CoreError::Internal("canceled by shutdown".to_string()));
        }

        let pixels = Arc::clone(&slide.pixels);
        let tile_inference = Arc::clone(&inference);
        let mask = tokio::task::spawn_blocking(move || {
            process_tile(&pixels, tile, tile_inference.as_ref())
        })
        .await
        .map_err(join_error)??;

        entries.push(artifacts::write_mask(&job_dir, tile.row, tile.col, &mask)?);
        masks.push((tile, mask));
        store.update_progress(job.id, index as u32 + 1, total).await?;
    }

    let tint = match job.job_type {
        JobType::SegmentCells => [255, 0, 0],
        JobType::TissueMask => [0, 255, 0],
    };
    let pixels = Arc::clone(&slide.pixels);
    let preview =
        tokio::task::spawn_blocking(move || artifacts::compose_preview(&pixels, &masks, tint))
            .await
            .map_err(join_error)?;
    entries.push(artifacts::write_preview(&job_dir, &preview)?);

    artifacts::sync_all(&job_dir, &entries)?;

    let started_at = store
        .job(job.id)
        .await
        .and_then(|j| j.started_at)
        .unwrap_or_else(Utc::now);
    let manifest = Manifest {
        job_id: job.id,
        workflow_id: job.workflow_id,
        tenant_id: job.tenant_id.clone(),
        job_type: job.job_type,
        branch: job.branch.clone(),
        tiles_total: total,
        level0_width: slide.level0_width,
        level0_height: slide.level0_height,
        created_at: job.created_at,
        started_at,
        finished_at: Utc::now(),
        artifacts: entries.clone(),
    };
    artifacts::write_manifest(&job_dir, &manifest)?;
    artifacts::write_archive(&job_dir, &entries)?;

    Ok(manifest)
}

/// Extract the padded read region, run inference, and crop the overlap
/// margins back off the mask.
fn process_tile(
    pixels: &RgbImage,
    tile: Tile,
    inference: &dyn TileInference,
) -> Result<GrayImage, CoreError> {
    let region = image::imageops::crop_imm(
        pixels,
        tile.read_x,
        tile.read_y,
        tile.read_width,
        tile.read_height,
    )
    .to_image();

    let mask = inference.apply(&region)?;
    if mask.dimensions() != (tile.read_width, tile.read_height) {
        return Err(CoreError::Internal(format!(
            "inference returned a {}x{} mask for a {}x{} tile",
            mask.width(),
            mask.height(),
            tile.read_width,
            tile.read_height
        )));
    }

    let (crop_x, crop_y) = tile.crop_offsets();
    Ok(image::imageops::crop_imm(&mask, crop_x, crop_y, tile.width, tile.height).to_image())
}

fn join_error(e: tokio::task::JoinError) -> CoreError {
    CoreError::Internal(format!("tile worker panicked: {e}"))
}
