//! The workflow/job store and its transactional transition primitive.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use slidemill_core::error::CoreError;
use slidemill_core::job::{Job, JobState, JobType};
use slidemill_core::scheduling;
use slidemill_core::types::{FileId, JobId, WorkflowId};
use slidemill_core::workflow::{aggregate, Workflow, WorkflowSnapshot};
use slidemill_events::{EventBus, UpdateEvent};

struct Inner {
    workflows: HashMap<WorkflowId, Workflow>,
    jobs: HashMap<JobId, Job>,
}

/// Exclusive owner of all workflow and job records.
///
/// Every public mutation runs under one write lock; the lock is always
/// released before events are published so a slow subscriber can never
/// hold up a state transition.
pub struct Store {
    inner: RwLock<Inner>,
    bus: Arc<EventBus>,
    max_jobs_per_workflow: usize,
}

impl Store {
    pub fn new(bus: Arc<EventBus>, max_jobs_per_workflow: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                workflows: HashMap::new(),
                jobs: HashMap::new(),
            }),
            bus,
            max_jobs_per_workflow,
        }
    }

    /// Access to the bus this store publishes on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    pub async fn create_workflow(&self, tenant: &str, name: &str) -> Workflow {
        let workflow = Workflow {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let mut inner = self.inner.write().await;
        inner.workflows.insert(workflow.id, workflow.clone());
        tracing::info!(workflow_id = %workflow.id, tenant, "Workflow created");
        workflow
    }

    /// Tenant-scoped snapshot with the derived aggregate.
    pub async fn workflow_snapshot(
        &self,
        tenant: &str,
        id: WorkflowId,
    ) -> Result<WorkflowSnapshot, CoreError> {
        let inner = self.inner.read().await;
        let workflow = owned_workflow(&inner, tenant, id)?;
        Ok(snapshot_locked(&inner, workflow.clone()))
    }

    /// Jobs of one workflow in creation order, tenant-scoped.
    pub async fn list_workflow_jobs(
        &self,
        tenant: &str,
        id: WorkflowId,
    ) -> Result<Vec<Job>, CoreError> {
        let inner = self.inner.read().await;
        owned_workflow(&inner, tenant, id)?;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.workflow_id == id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Create a PENDING job inside a workflow.
    ///
    /// Fails with NotFound for an unknown workflow, Forbidden on tenant
    /// mismatch, and LimitExceeded once the workflow holds the maximum
    /// number of jobs.
    pub async fn create_job(
        &self,
        tenant: &str,
        workflow_id: WorkflowId,
        file_id: FileId,
        job_type: JobType,
        branch: String,
    ) -> Result<Job, CoreError> {
        let mut inner = self.inner.write().await;
        owned_workflow(&inner, tenant, workflow_id)?;

        let existing = inner
            .jobs
            .values()
            .filter(|j| j.workflow_id == workflow_id)
            .count();
        if existing >= self.max_jobs_per_workflow {
            return Err(CoreError::LimitExceeded(format!(
                "workflow {workflow_id} already has {existing} jobs (max {})",
                self.max_jobs_per_workflow
            )));
        }

        let job = Job {
            id: Uuid::new_v4(),
            workflow_id,
            tenant_id: tenant.to_string(),
            file_id,
            job_type,
            branch,
            state: JobState::Pending,
            progress: 0.0,
            tiles_done: 0,
            tiles_total: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            manifest: None,
        };
        inner.jobs.insert(job.id, job.clone());
        tracing::info!(
            job_id = %job.id,
            workflow_id = %workflow_id,
            job_type = %job.job_type,
            branch = %job.branch,
            "Job created"
        );
        Ok(job)
    }

    /// Tenant-scoped job snapshot.
    pub async fn get_job(&self, tenant: &str, id: JobId) -> Result<Job, CoreError> {
        let inner = self.inner.read().await;
        owned_job(&inner, tenant, id).cloned()
    }

    /// Job snapshot without tenant scoping, for the scheduler and
    /// executor, which operate on already-admitted work.
    pub async fn job(&self, id: JobId) -> Option<Job> {
        self.inner.read().await.jobs.get(&id).cloned()
    }

    // -----------------------------------------------------------------------
    // Mutation primitives
    // -----------------------------------------------------------------------

    /// Atomic compare-and-set state transition.
    ///
    /// Succeeds only if the job's current state is in `from_states` and
    /// the transition table allows `current -> to`; otherwise the job is
    /// left untouched and Conflict is returned. On success the `mutator`
    /// runs against the job under the lock, entry timestamps are stamped,
    /// and exactly one job event plus one workflow event are published
    /// after the lock is released.
    pub async fn transition(
        &self,
        job_id: JobId,
        from_states: &[JobState],
        to: JobState,
        mutator: impl FnOnce(&mut Job),
    ) -> Result<Job, CoreError> {
        let (job, workflow_event) = {
            let mut inner = self.inner.write().await;
            let job = inner.jobs.get_mut(&job_id).ok_or(CoreError::NotFound {
                entity: "job",
                id: job_id,
            })?;

            if !from_states.contains(&job.state) {
                return Err(CoreError::Conflict(format!(
                    "job {job_id} is {}, cannot apply {to}",
                    job.state
                )));
            }
            scheduling::validate_transition(job.state, to).map_err(CoreError::Conflict)?;

            let now = Utc::now();
            job.state = to;
            match to {
                JobState::Running => job.started_at = Some(now),
                s if s.is_terminal() => job.finished_at = Some(now),
                _ => {}
            }
            mutator(job);

            let job = job.clone();
            let workflow = inner
                .workflows
                .get(&job.workflow_id)
                .cloned()
                .expect("job belongs to a known workflow");
            let snapshot = snapshot_locked(&inner, workflow);
            (job, UpdateEvent::for_workflow(&snapshot))
        };

        tracing::info!(job_id = %job.id, state = %job.state, "Job state transition");
        let reason = match to {
            JobState::Failed => job.error.clone(),
            _ => None,
        };
        self.bus.publish(UpdateEvent::for_job(&job, reason)).await;
        self.bus.publish(workflow_event).await;
        Ok(job)
    }

    /// Record tile progress on a RUNNING job.
    ///
    /// `tiles_total` is set by the first call of an episode; progress is
    /// clamped monotonic non-decreasing within the episode.
    pub async fn update_progress(
        &self,
        job_id: JobId,
        done: u32,
        total: u32,
    ) -> Result<Job, CoreError> {
        let (job, workflow_event) = {
            let mut inner = self.inner.write().await;
            let job = inner.jobs.get_mut(&job_id).ok_or(CoreError::NotFound {
                entity: "job",
                id: job_id,
            })?;
            if job.state != JobState::Running {
                return Err(CoreError::Conflict(format!(
                    "job {job_id} is {}, progress applies to RUNNING jobs only",
                    job.state
                )));
            }

            job.tiles_done = job.tiles_done.max(done);
            job.tiles_total = total;
            let fraction = if total == 0 {
                0.0
            } else {
                f64::from(job.tiles_done) / f64::from(total)
            };
            job.progress = job.progress.max(fraction.clamp(0.0, 1.0));

            let job = job.clone();
            let workflow = inner
                .workflows
                .get(&job.workflow_id)
                .cloned()
                .expect("job belongs to a known workflow");
            let snapshot = snapshot_locked(&inner, workflow);
            (job, UpdateEvent::for_workflow(&snapshot))
        };

        self.bus.publish(UpdateEvent::for_job(&job, None)).await;
        self.bus.publish(workflow_event).await;
        Ok(job)
    }
}

/// Look up a workflow and enforce tenant ownership.
fn owned_workflow<'a>(
    inner: &'a Inner,
    tenant: &str,
    id: WorkflowId,
) -> Result<&'a Workflow, CoreError> {
    let workflow = inner.workflows.get(&id).ok_or(CoreError::NotFound {
        entity: "workflow",
        id,
    })?;
    if workflow.tenant_id != tenant {
        return Err(CoreError::Forbidden(format!(
            "workflow {id} belongs to another tenant"
        )));
    }
    Ok(workflow)
}

/// Look up a job and enforce tenant ownership.
fn owned_job<'a>(inner: &'a Inner, tenant: &str, id: JobId) -> Result<&'a Job, CoreError> {
    let job = inner
        .jobs
        .get(&id)
        .ok_or(CoreError::NotFound { entity: "job", id })?;
    if job.tenant_id != tenant {
        return Err(CoreError::Forbidden(format!(
            "job {id} belongs to another tenant"
        )));
    }
    Ok(job)
}

/// Compute a workflow snapshot while the map lock is held.
fn snapshot_locked(inner: &Inner, workflow: Workflow) -> WorkflowSnapshot {
    let jobs: Vec<Job> = inner
        .jobs
        .values()
        .filter(|j| j.workflow_id == workflow.id)
        .cloned()
        .collect();
    let (state, percent_complete, job_counts) = aggregate(&jobs);
    WorkflowSnapshot {
        workflow,
        state,
        percent_complete,
        job_counts,
    }
}
