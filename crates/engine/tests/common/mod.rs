// Shared helpers for engine integration tests. Not every test binary
// uses every helper, so dead_code warnings are suppressed here.
#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{GrayImage, Rgb, RgbImage};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use slidemill_core::config::Settings;
use slidemill_core::error::CoreError;
use slidemill_core::job::{Job, JobState, JobType};
use slidemill_core::types::{FileId, JobId, WorkflowId};
use slidemill_engine::{InferenceRegistry, Scheduler, TileInference};
use slidemill_events::EventBus;
use slidemill_store::{FileStore, Store};

pub struct Harness {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<Store>,
    pub files: Arc<FileStore>,
    pub settings: Arc<Settings>,
    _dir: TempDir,
}

/// Build a full engine with a tempdir data root and small tiles.
pub fn build(
    configure: impl FnOnce(&mut Settings),
    register: impl FnOnce(&mut InferenceRegistry),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings {
        tile_size: 32,
        tile_overlap: 4,
        data_dir: dir.path().to_path_buf(),
        ..Settings::default()
    };
    configure(&mut settings);
    let settings = Arc::new(settings);

    let bus = Arc::new(EventBus::default());
    let store = Arc::new(Store::new(bus, settings.max_jobs_per_workflow));
    let files = Arc::new(FileStore::new(&settings.data_dir).unwrap());
    let mut registry = InferenceRegistry::new(&settings);
    register(&mut registry);

    let scheduler = Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&files),
        Arc::clone(&settings),
        Arc::new(registry),
        CancellationToken::new(),
    );
    Harness {
        scheduler,
        store,
        files,
        settings,
        _dir: dir,
    }
}

/// Upload a checkerboard PNG and return its file id.
pub async fn upload_png(h: &Harness, tenant: &str, width: u32, height: u32) -> FileId {
    let img = RgbImage::from_fn(width, height, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Rgb([230, 230, 230])
        } else {
            Rgb([20, 20, 20])
        }
    });
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .unwrap();
    h.files
        .save(tenant, "slide.png", Some("image/png".to_string()), &bytes)
        .await
        .unwrap()
        .id
}

/// Create a 32x32 (single-tile) TISSUE_MASK job on the given branch.
pub async fn single_tile_job(
    h: &Harness,
    tenant: &str,
    workflow_id: WorkflowId,
    branch: &str,
) -> Job {
    let file_id = upload_png(h, tenant, 32, 32).await;
    h.store
        .create_job(
            tenant,
            workflow_id,
            file_id,
            JobType::TissueMask,
            branch.to_string(),
        )
        .await
        .unwrap()
}

/// Poll until the job satisfies `pred`, panicking after ten seconds.
pub async fn wait_for(h: &Harness, job_id: JobId, pred: impl Fn(&Job) -> bool) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(job) = h.store.job(job_id).await {
            if pred(&job) {
                return job;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting on job {job_id}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_state(h: &Harness, job_id: JobId, state: JobState) -> Job {
    wait_for(h, job_id, |j| j.state == state).await
}

/// Inference that blocks each tile until the test releases a ticket.
///
/// Lets tests hold jobs in RUNNING deterministically and observe the
/// scheduler's queue behavior in between.
pub struct GateInference {
    tickets: Mutex<mpsc::Receiver<()>>,
}

#[derive(Clone)]
pub struct Gate {
    tx: mpsc::Sender<()>,
}

impl Gate {
    /// Allow `n` further tiles to complete.
    pub fn release(&self, n: usize) {
        for _ in 0..n {
            self.tx.send(()).unwrap();
        }
    }
}

/// Build a gate plus the inference half to register for a job type.
pub fn gate() -> (Gate, Arc<GateInference>) {
    let (tx, rx) = mpsc::channel();
    (
        Gate { tx },
        Arc::new(GateInference {
            tickets: Mutex::new(rx),
        }),
    )
}

impl TileInference for GateInference {
    fn apply(&self, tile: &RgbImage) -> Result<GrayImage, CoreError> {
        self.tickets
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| CoreError::Internal("gate was never released".to_string()))?;
        Ok(GrayImage::new(tile.width(), tile.height()))
    }
}
