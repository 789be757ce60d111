//! Live-update fan-out for jobs and workflows.

mod bus;

pub use bus::{EntityKind, EventBus, Subscriber, UpdateEvent, DEFAULT_SUBSCRIBER_BUFFER};
