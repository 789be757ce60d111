//! Integration tests for the tiled executor's artifact pipeline.

mod common;

use common::{build, upload_png, wait_for_state};
use image::{GrayImage, RgbImage};
use slidemill_core::error::CoreError;
use slidemill_core::job::{JobState, JobType};
use slidemill_engine::TileInference;

const TENANT: &str = "tenant-1";

#[tokio::test]
async fn succeeded_job_produces_the_full_artifact_set() {
    let h = build(|_| {}, |_| {});
    let wf = h.store.create_workflow(TENANT, "wf").await;

    // 64x48 with 32px tiles: a 2x2 grid.
    let file_id = upload_png(&h, TENANT, 64, 48).await;
    let job = h
        .store
        .create_job(TENANT, wf.id, file_id, JobType::TissueMask, "A".to_string())
        .await
        .unwrap();
    h.scheduler.start(job.id).await.unwrap();
    let done = wait_for_state(&h, job.id, JobState::Succeeded).await;

    assert_eq!(done.tiles_total, 4);
    assert_eq!(done.tiles_done, 4);
    assert_eq!(done.progress, 1.0);

    let dir = h.files.job_dir(job.id);
    for (row, col) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
        let mask_path = dir.join(format!("mask_{row}_{col}.png"));
        assert!(mask_path.exists(), "missing {}", mask_path.display());
        // Cropped masks carry the core tile size, margins discarded.
        let mask = image::open(&mask_path).unwrap().to_luma8();
        let expected = (32, if row == 0 { 32 } else { 16 });
        assert_eq!((mask.width(), mask.height()), expected);
    }
    assert!(dir.join("preview.png").exists());
    assert!(dir.join("artifacts.zip").exists());
    assert!(!dir.join("artifacts.zip.tmp").exists());

    // The manifest lists every mask plus the preview, with sizes.
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.join("manifest.json")).unwrap()).unwrap();
    let artifacts = manifest["artifacts"].as_array().unwrap();
    assert_eq!(artifacts.len(), 5);
    assert!(artifacts.iter().all(|a| a["bytes"].as_u64().unwrap() > 0));
    assert_eq!(manifest["job_id"], job.id.to_string());
    assert_eq!(manifest["workflow_id"], wf.id.to_string());
    assert_eq!(manifest["tenant_id"], TENANT);
    assert_eq!(manifest["job_type"], "TISSUE_MASK");
    assert_eq!(manifest["branch"], "A");
    assert_eq!(manifest["tiles_total"], 4);

    // The job record carries the same manifest.
    let recorded = done.manifest.expect("manifest on the job record");
    assert_eq!(recorded.artifacts.len(), 5);
    assert_eq!(recorded.tiles_total, 4);
}

#[tokio::test]
async fn failing_inference_marks_the_job_failed_without_a_manifest() {
    struct Exploding;
    impl TileInference for Exploding {
        fn apply(&self, _tile: &RgbImage) -> Result<GrayImage, CoreError> {
            Err(CoreError::Internal("model exploded".to_string()))
        }
    }

    let h = build(
        |_| {},
        |r| r.register(JobType::TissueMask, std::sync::Arc::new(Exploding)),
    );
    let wf = h.store.create_workflow(TENANT, "wf").await;
    let file_id = upload_png(&h, TENANT, 64, 48).await;
    let job = h
        .store
        .create_job(TENANT, wf.id, file_id, JobType::TissueMask, "A".to_string())
        .await
        .unwrap();

    h.scheduler.start(job.id).await.unwrap();
    let failed = wait_for_state(&h, job.id, JobState::Failed).await;

    assert!(failed.error.unwrap().contains("model exploded"));
    assert!(failed.manifest.is_none());
    assert!(!h.files.job_dir(job.id).join("manifest.json").exists());
    assert!(!h.files.job_dir(job.id).join("artifacts.zip").exists());
}

#[tokio::test]
async fn undecodable_input_fails_with_a_reason() {
    let h = build(|_| {}, |_| {});
    let wf = h.store.create_workflow(TENANT, "wf").await;
    let bad = h
        .files
        .save(TENANT, "slide.png", None, b"not image data")
        .await
        .unwrap();
    let job = h
        .store
        .create_job(TENANT, wf.id, bad.id, JobType::SegmentCells, String::new())
        .await
        .unwrap();

    h.scheduler.start(job.id).await.unwrap();
    let failed = wait_for_state(&h, job.id, JobState::Failed).await;
    assert!(failed.error.unwrap().contains("cannot decode"));
}

#[tokio::test]
async fn failed_progress_is_preserved_for_inspection() {
    // Fails on the third tile; the first two report progress that the
    // FAILED record keeps.
    struct FailsLater {
        calls: std::sync::atomic::AtomicU32,
    }
    impl TileInference for FailsLater {
        fn apply(&self, tile: &RgbImage) -> Result<GrayImage, CoreError> {
            let n = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n >= 2 {
                return Err(CoreError::Internal("tile 3 exploded".to_string()));
            }
            Ok(GrayImage::new(tile.width(), tile.height()))
        }
    }

    let h = build(
        |_| {},
        |r| {
            r.register(
                JobType::TissueMask,
                std::sync::Arc::new(FailsLater {
                    calls: std::sync::atomic::AtomicU32::new(0),
                }),
            )
        },
    );
    let wf = h.store.create_workflow(TENANT, "wf").await;
    let file_id = upload_png(&h, TENANT, 64, 64).await;
    let job = h
        .store
        .create_job(TENANT, wf.id, file_id, JobType::TissueMask, "A".to_string())
        .await
        .unwrap();

    h.scheduler.start(job.id).await.unwrap();
    let failed = wait_for_state(&h, job.id, JobState::Failed).await;

    assert_eq!(failed.tiles_done, 2);
    assert_eq!(failed.tiles_total, 4);
    assert!((failed.progress - 0.5).abs() < f64::EPSILON);

    // Partial masks stay on disk for debugging, unreferenced.
    let dir = h.files.job_dir(job.id);
    assert!(dir.join("mask_0_0.png").exists());
    assert!(!dir.join("manifest.json").exists());
}
