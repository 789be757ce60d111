//! Server-sent event streams over the per-entity bus.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use slidemill_events::Subscriber;

/// Wrap a bus subscriber into an SSE response.
///
/// A lagged subscriber silently skips the dropped events and resumes
/// from the oldest retained one; the stream itself stays attached.
pub fn sse_from_subscriber(
    subscriber: Subscriber,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(subscriber).filter_map(|item| async move {
        match item {
            Ok(update) => Event::default().json_data(&update).ok().map(Ok),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "SSE subscriber lagged");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
