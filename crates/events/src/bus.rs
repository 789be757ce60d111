//! In-process event bus with one bounded channel per entity.
//!
//! [`EventBus`] is the publish/subscribe hub for [`UpdateEvent`]s. It is
//! shared via `Arc<EventBus>` across the store, the engine, and the API
//! layer. Publishing never blocks: a subscriber that falls behind its
//! bounded buffer loses the oldest events for that entity, not the
//! producer's time.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use slidemill_core::job::Job;
use slidemill_core::types::Timestamp;
use slidemill_core::workflow::{WorkflowSnapshot, WorkflowState};

/// Default per-subscriber buffer capacity.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// What kind of entity an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Workflow,
}

/// One live update for a job or a workflow.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateEvent {
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub state: &'static str,
    pub progress: f64,
    pub tiles_done: u32,
    pub tiles_total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: Timestamp,
}

impl UpdateEvent {
    /// Build an event from a job's current snapshot.
    pub fn for_job(job: &Job, reason: Option<String>) -> Self {
        Self {
            entity_kind: EntityKind::Job,
            entity_id: job.id,
            state: job.state.as_str(),
            progress: job.progress,
            tiles_done: job.tiles_done,
            tiles_total: job.tiles_total,
            reason,
            at: Utc::now(),
        }
    }

    /// Build an event from a workflow's derived aggregate.
    pub fn for_workflow(snapshot: &WorkflowSnapshot) -> Self {
        let state = match snapshot.state {
            WorkflowState::Pending => "PENDING",
            WorkflowState::Running => "RUNNING",
            WorkflowState::Succeeded => "SUCCEEDED",
            WorkflowState::Failed => "FAILED",
        };
        Self {
            entity_kind: EntityKind::Workflow,
            entity_id: snapshot.workflow.id,
            state,
            progress: snapshot.percent_complete,
            tiles_done: 0,
            tiles_total: 0,
            reason: None,
            at: Utc::now(),
        }
    }
}

/// A bounded receiver of one entity's updates.
///
/// When the buffer overflows the receiver observes `RecvError::Lagged`
/// and continues from the oldest retained event.
pub type Subscriber = broadcast::Receiver<UpdateEvent>;

/// Per-entity fan-out hub.
///
/// One `broadcast` channel per entity id, created lazily on first
/// subscription and pruned once the last subscriber is gone.
pub struct EventBus {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<UpdateEvent>>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with a specific per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to one entity's updates.
    pub async fn subscribe(&self, entity_id: Uuid) -> Subscriber {
        let mut channels = self.channels.write().await;
        channels
            .entry(entity_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish an update to the event's entity channel.
    ///
    /// A no-op when nobody is subscribed to that entity. Channels whose
    /// last subscriber has gone away are removed here so the map does not
    /// accumulate dead senders.
    pub async fn publish(&self, event: UpdateEvent) {
        {
            let channels = self.channels.read().await;
            match channels.get(&event.entity_id) {
                None => return,
                Some(sender) if sender.receiver_count() > 0 => {
                    // Err only means every receiver vanished since the
                    // count check; the next publish prunes the channel.
                    let _ = sender.send(event);
                    return;
                }
                Some(_) => {}
            }
        }

        // The last subscriber is gone: drop the channel. Re-checked
        // under the write lock in case someone re-subscribed meanwhile.
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(&event.entity_id) {
            if sender.receiver_count() == 0 {
                channels.remove(&event.entity_id);
                tracing::debug!(entity_id = %event.entity_id, "Pruned idle event channel");
            }
        }
    }

    /// Number of entities with a live channel (test and debug aid).
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}
