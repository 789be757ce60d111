use serde::{Deserialize, Serialize};

use crate::job::{Job, JobState};
use crate::types::{TenantId, Timestamp, WorkflowId};

/// Derived state of a workflow, computed from its current job set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// A workflow: a named, tenant-owned container of jobs.
///
/// The record itself is immutable after creation; everything observable
/// beyond identity is derived from the job set on demand.
#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub tenant_id: TenantId,
    pub name: String,
    pub created_at: Timestamp,
}

/// Job tally by state, included in workflow snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStateCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
}

/// Point-in-time view of a workflow plus its derived aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub state: WorkflowState,
    /// Mean job progress over non-canceled jobs, in `[0, 1]`.
    pub percent_complete: f64,
    pub job_counts: JobStateCounts,
}

/// Compute the derived aggregate for a workflow's job set.
///
/// Canceled jobs are excluded from the mean entirely; SUCCEEDED jobs
/// count as 1.0 and FAILED jobs count their last observed progress.
/// State precedence: RUNNING if any job is running; else SUCCEEDED when
/// at least one non-canceled job exists and all of them succeeded; else
/// FAILED if any job failed; else PENDING.
pub fn aggregate(jobs: &[Job]) -> (WorkflowState, f64, JobStateCounts) {
    let mut counts = JobStateCounts::default();
    let mut progress_sum = 0.0;
    for job in jobs {
        match job.state {
            JobState::Pending => counts.pending += 1,
            JobState::Running => counts.running += 1,
            JobState::Succeeded => counts.succeeded += 1,
            JobState::Failed => counts.failed += 1,
            JobState::Canceled => counts.canceled += 1,
        }
        match job.state {
            JobState::Canceled => {}
            JobState::Succeeded => progress_sum += 1.0,
            _ => progress_sum += job.progress,
        }
    }

    let considered = jobs.len() - counts.canceled;
    let percent = if considered == 0 {
        0.0
    } else {
        progress_sum / considered as f64
    };

    let state = if counts.running > 0 {
        WorkflowState::Running
    } else if considered > 0 && counts.succeeded == considered {
        WorkflowState::Succeeded
    } else if counts.failed > 0 {
        WorkflowState::Failed
    } else {
        WorkflowState::Pending
    };

    (state, percent, counts)
}
