pub mod events;
pub mod files;
pub mod jobs;
pub mod workflows;
