//! Admission scheduling under three overlapping constraints.
//!
//! A PENDING job is admitted only when a worker slot is free, its
//! `(workflow, branch)` key is idle, and its tenant either already has
//! running work or fits under the active-tenant ceiling. The admission
//! state lives behind a single mutex; selection passes do only in-memory
//! work under it and hand admitted jobs to the executor via
//! `tokio::spawn`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use slidemill_core::config::Settings;
use slidemill_core::error::CoreError;
use slidemill_core::job::{Job, JobState};
use slidemill_core::types::{BranchKey, JobId, TenantId};
use slidemill_store::{FileStore, Store};

use crate::executor;
use crate::inference::InferenceRegistry;

/// Why a PENDING job is currently not admissible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitReason {
    /// Another job in the same workflow branch is RUNNING.
    Branch,
    /// The active-tenant ceiling is reached and this tenant is not active.
    UserSlot,
    /// Every worker slot is taken.
    Worker,
}

/// Queue diagnostics for one job plus the global tallies.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queued: bool,
    pub waiting_for: Vec<WaitReason>,
    pub active_users: usize,
    pub max_active_users: usize,
    pub active_workers: usize,
    pub max_workers: usize,
}

struct SchedState {
    /// PENDING job ids in FIFO insertion order. Admission scans this
    /// list instead of popping it, so a blocked head never stalls
    /// admissible jobs behind it.
    queue: Vec<JobId>,
    branch_busy: HashSet<BranchKey>,
    /// RUNNING-job count per tenant; a tenant leaves the set at zero.
    active_tenants: HashMap<TenantId, usize>,
    workers_in_use: usize,
}

/// The admission scheduler. Shared as `Arc<Scheduler>`.
pub struct Scheduler {
    state: Mutex<SchedState>,
    store: Arc<Store>,
    files: Arc<FileStore>,
    settings: Arc<Settings>,
    inference: Arc<InferenceRegistry>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        files: Arc<FileStore>,
        settings: Arc<Settings>,
        inference: Arc<InferenceRegistry>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedState {
                queue: Vec::new(),
                branch_busy: HashSet::new(),
                active_tenants: HashMap::new(),
                workers_in_use: 0,
            }),
            store,
            files,
            settings,
            inference,
            shutdown,
        })
    }

    /// Enqueue a PENDING job and run a selection pass.
    ///
    /// Idempotent for an already-queued job; Conflict for any other
    /// state — only PENDING work enters the admission queue.
    pub async fn start(self: &Arc<Self>, job_id: JobId) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let job = self.store.job(job_id).await.ok_or(CoreError::NotFound {
            entity: "job",
            id: job_id,
        })?;
        if job.state != JobState::Pending {
            return Err(CoreError::Conflict(format!(
                "job {job_id} is {}, only PENDING jobs can be started",
                job.state
            )));
        }
        if !state.queue.contains(&job_id) {
            state.queue.push(job_id);
            tracing::info!(job_id = %job_id, position = state.queue.len(), "Job enqueued");
        }
        self.run_selection_pass(&mut state).await;
        Ok(())
    }

    /// Cancel a PENDING job: drop it from the queue and transition it.
    ///
    /// Synchronous under the scheduler lock, so a concurrent selection
    /// pass can never admit a job that is being canceled.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job, CoreError> {
        let mut state = self.state.lock().await;
        let job = self
            .store
            .transition(job_id, &[JobState::Pending], JobState::Canceled, |_| {})
            .await?;
        state.queue.retain(|id| *id != job_id);
        tracing::info!(job_id = %job_id, "Job canceled");
        Ok(job)
    }

    /// Retry a terminal job: reset it to PENDING and re-enqueue at the
    /// FIFO tail. Conflict while PENDING or RUNNING.
    pub async fn retry(self: &Arc<Self>, job_id: JobId) -> Result<Job, CoreError> {
        let mut state = self.state.lock().await;
        let job = self
            .store
            .transition(
                job_id,
                &[JobState::Succeeded, JobState::Failed, JobState::Canceled],
                JobState::Pending,
                Job::reset_for_retry,
            )
            .await?;
        state.queue.push(job_id);
        tracing::info!(job_id = %job_id, "Job re-enqueued for retry");
        self.run_selection_pass(&mut state).await;
        Ok(job)
    }

    /// Queue diagnostics for a job the caller has already fetched.
    pub async fn queue_status(&self, job: &Job) -> QueueStatus {
        let state = self.state.lock().await;
        let queued = job.state == JobState::Pending;
        let mut waiting_for = Vec::new();
        if queued {
            if state.branch_busy.contains(&job.branch_key()) {
                waiting_for.push(WaitReason::Branch);
            }
            if !state.active_tenants.contains_key(&job.tenant_id)
                && state.active_tenants.len() >= self.settings.max_active_users
            {
                waiting_for.push(WaitReason::UserSlot);
            }
            if state.workers_in_use >= self.settings.max_workers {
                waiting_for.push(WaitReason::Worker);
            }
        }
        QueueStatus {
            queued,
            waiting_for,
            active_users: state.active_tenants.len(),
            max_active_users: self.settings.max_active_users,
            active_workers: state.workers_in_use,
            max_workers: self.settings.max_workers,
        }
    }

    /// Token observed by executors between tiles; cancel it to drain
    /// the worker pool on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Scan the queue in FIFO order and admit everything admissible.
    ///
    /// Jobs blocked on one constraint are skipped, not waited on, so a
    /// busy branch or a capped tenant cannot stall the jobs behind it.
    async fn run_selection_pass(self: &Arc<Self>, state: &mut SchedState) {
        let mut index = 0;
        while index < state.queue.len() {
            if state.workers_in_use >= self.settings.max_workers {
                break;
            }
            let job_id = state.queue[index];
            let job = match self.store.job(job_id).await {
                // A job that left PENDING behind our back (or vanished)
                // no longer belongs in the queue.
                Some(job) if job.state == JobState::Pending => job,
                _ => {
                    state.queue.remove(index);
                    continue;
                }
            };

            let branch_key = job.branch_key();
            if state.branch_busy.contains(&branch_key) {
                index += 1;
                continue;
            }
            let tenant_active = state.active_tenants.contains_key(&job.tenant_id);
            if !tenant_active && state.active_tenants.len() >= self.settings.max_active_users {
                index += 1;
                continue;
            }

            match self
                .store
                .transition(job_id, &[JobState::Pending], JobState::Running, |_| {})
                .await
            {
                Ok(job) => {
                    state.queue.remove(index);
                    state.workers_in_use += 1;
                    state.branch_busy.insert(branch_key);
                    *state.active_tenants.entry(job.tenant_id.clone()).or_insert(0) += 1;
                    tracing::info!(
                        job_id = %job_id,
                        tenant = %job.tenant_id,
                        branch = %job.branch,
                        active_workers = state.workers_in_use,
                        "Job admitted"
                    );
                    self.dispatch(job);
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Admission CAS rejected");
                    state.queue.remove(index);
                }
            }
        }
    }

    /// Non-blocking hand-off of an admitted job to the executor.
    fn dispatch(self: &Arc<Self>, job: Job) {
        let scheduler = Arc::clone(self);
        let inference = self.inference.resolve(job.job_type);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            let released = job.clone();
            executor::run_job(
                Arc::clone(&scheduler.store),
                Arc::clone(&scheduler.files),
                Arc::clone(&scheduler.settings),
                inference,
                job,
                cancel,
            )
            .await;
            scheduler.on_terminal(&released).await;
        });
    }

    /// Release an admitted job's three resources and re-scan.
    ///
    /// The tallies are the integrity boundary of the system: releasing
    /// a resource that was never held is a bug, not a recoverable state.
    async fn on_terminal(self: &Arc<Self>, job: &Job) {
        let mut state = self.state.lock().await;
        assert!(state.workers_in_use > 0, "worker slot released twice");
        state.workers_in_use -= 1;
        assert!(
            state.branch_busy.remove(&job.branch_key()),
            "branch key released twice"
        );
        let remaining = {
            let count = state
                .active_tenants
                .get_mut(&job.tenant_id)
                .expect("tenant released twice");
            assert!(*count > 0, "tenant running count underflow");
            *count -= 1;
            *count
        };
        if remaining == 0 {
            state.active_tenants.remove(&job.tenant_id);
        }
        tracing::info!(
            job_id = %job.id,
            active_workers = state.workers_in_use,
            active_users = state.active_tenants.len(),
            "Job resources released"
        );
        self.run_selection_pass(&mut state).await;
    }
}
