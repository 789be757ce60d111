use serde::{Deserialize, Serialize};

use crate::types::{FileId, JobId, TenantId, Timestamp, WorkflowId};

/// Lifecycle state of a job.
///
/// `Pending` is the initial state; `Succeeded`, `Failed`, and `Canceled`
/// are terminal. Legal transitions live in [`crate::scheduling`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    /// Whether no further transition except retry is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Canceled
        )
    }

    /// Wire name of this state (matches the serde representation).
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of per-tile inference kinds a job may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    SegmentCells,
    TissueMask,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JobType::SegmentCells => "SEGMENT_CELLS",
            JobType::TissueMask => "TISSUE_MASK",
        })
    }
}

/// One entry in a completed job's artifact manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Path relative to the job's results directory.
    pub path: String,
    /// Size on disk in bytes.
    pub bytes: u64,
}

/// Artifact manifest written as `manifest.json` when a job succeeds.
///
/// Its existence on disk is the completion signal: it is written only
/// after every listed artifact has been flushed to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: JobId,
    pub workflow_id: WorkflowId,
    pub tenant_id: TenantId,
    pub job_type: JobType,
    pub branch: String,
    pub tiles_total: u32,
    pub level0_width: u32,
    pub level0_height: u32,
    pub created_at: Timestamp,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub artifacts: Vec<ArtifactEntry>,
}

/// A single inference job over one uploaded file.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub workflow_id: WorkflowId,
    /// Copied from the owning workflow at creation; never changes.
    pub tenant_id: TenantId,
    pub file_id: FileId,
    pub job_type: JobType,
    /// Serial-execution label; the empty string is a branch of its own.
    pub branch: String,
    pub state: JobState,
    /// Fraction complete in `[0, 1]`, monotonic within a RUNNING episode.
    pub progress: f64,
    pub tiles_done: u32,
    pub tiles_total: u32,
    /// Failure description, present only on FAILED.
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    /// Populated on SUCCEEDED only.
    pub manifest: Option<Manifest>,
}

impl Job {
    /// The branch key this job serializes on.
    pub fn branch_key(&self) -> crate::types::BranchKey {
        (self.workflow_id, self.branch.clone())
    }

    /// Reset transient execution state for a retry.
    ///
    /// Identity, ownership, file reference, type, and branch are kept;
    /// progress, tile counters, error, manifest, and episode timestamps
    /// are cleared.
    pub fn reset_for_retry(&mut self) {
        self.progress = 0.0;
        self.tiles_done = 0;
        self.tiles_total = 0;
        self.error = None;
        self.started_at = None;
        self.finished_at = None;
        self.manifest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Canceled.is_terminal());
    }

    #[test]
    fn job_type_round_trips_through_wire_names() {
        let parsed: JobType = serde_json::from_str("\"SEGMENT_CELLS\"").unwrap();
        assert_eq!(parsed, JobType::SegmentCells);
        assert_eq!(
            serde_json::to_string(&JobType::TissueMask).unwrap(),
            "\"TISSUE_MASK\""
        );
    }

    #[test]
    fn unknown_job_type_is_rejected() {
        let parsed = serde_json::from_str::<JobType>("\"SHARPEN\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn state_wire_names_match_display() {
        for state in [
            JobState::Pending,
            JobState::Running,
            JobState::Succeeded,
            JobState::Failed,
            JobState::Canceled,
        ] {
            let wire = serde_json::to_string(&state).unwrap();
            assert_eq!(wire, format!("\"{state}\""));
        }
    }
}
