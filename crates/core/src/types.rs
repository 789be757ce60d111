/// Workflow identifiers are process-local UUIDs.
pub type WorkflowId = uuid::Uuid;

/// Job identifiers are process-local UUIDs.
pub type JobId = uuid::Uuid;

/// Uploaded-file identifiers are process-local UUIDs.
pub type FileId = uuid::Uuid;

/// Tenants are opaque caller-supplied identifiers.
pub type TenantId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// The unit of serial execution: jobs sharing a `(workflow, branch)` pair
/// run one at a time, in FIFO start order. Branches of different workflows
/// are independent even when their labels collide, and the empty label is
/// a legal branch of its own.
pub type BranchKey = (WorkflowId, String);
