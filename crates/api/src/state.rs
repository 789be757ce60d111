use std::sync::Arc;

use slidemill_core::config::Settings;
use slidemill_engine::Scheduler;
use slidemill_events::EventBus;
use slidemill_store::{FileStore, Store};

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Cheaply cloneable: every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Immutable runtime settings.
    pub settings: Arc<Settings>,
    /// Workflow and job records.
    pub store: Arc<Store>,
    /// Uploaded inputs and per-job results directories.
    pub files: Arc<FileStore>,
    /// Admission scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Live-update fan-out for SSE subscribers.
    pub bus: Arc<EventBus>,
}
