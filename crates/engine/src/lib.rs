//! The slidemill execution engine: admission scheduling and the
//! tiled-execution driver.

mod artifacts;
mod executor;
mod inference;
mod scheduler;
mod slide;

pub use inference::{InferenceRegistry, MeanThresholdSegmenter, OtsuTissueMask, TileInference};
pub use scheduler::{QueueStatus, Scheduler, WaitReason};
pub use slide::SlideImage;
