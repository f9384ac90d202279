//! Builds the `GET /messages/{id}/stream` SSE response: an optional
//! synthesized `waiting` event, the replay buffer, the live tail, and
//! periodic keepalive comments.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use broker_core::StreamEvent;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// `broker-core`'s internal `Started` event is not part of the named wire
/// catalogue subscribers observe — it exists at the broadcaster level for
/// diagnostics (e.g. asserting dispatch order directly against `Engine` in
/// tests) but is filtered out here so HTTP subscribers see exactly the
/// five named events.
fn to_sse_event(event: StreamEvent) -> Option<Event> {
    let built = match event {
        StreamEvent::Started => return None,
        StreamEvent::Waiting { position } => Event::default().event("waiting").json_data(
            serde_json::json!({ "state": "queued", "position": position, "message": "Waiting in queue" }),
        ),
        StreamEvent::Chunk { index, text } => Event::default().event("chunk").json_data(
            serde_json::json!({ "type": "content", "chunk": text, "index": index }),
        ),
        StreamEvent::Done { result, completed_at } => Event::default().event("done").json_data(
            serde_json::json!({ "state": "completed", "result": result, "completed_at": completed_at }),
        ),
        StreamEvent::Error { message, completed_at } => Event::default().event("error").json_data(
            serde_json::json!({ "state": "failed", "error": message, "completed_at": completed_at }),
        ),
        StreamEvent::Cancelled { completed_at } => Event::default().event("cancelled").json_data(
            serde_json::json!({ "state": "cancelled", "completed_at": completed_at }),
        ),
    };
    Some(built.expect("SSE event payloads are plain JSON and always serialize"))
}

/// Assemble the full event stream for one subscriber: an optional
/// synthesized `waiting` event (at most one, only for a still-queued
/// message), the replay snapshot, then the live tail.
pub fn event_stream(
    waiting_position: Option<usize>,
    replay: Vec<StreamEvent>,
    receiver: Option<mpsc::Receiver<StreamEvent>>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let waiting = waiting_position.map(|position| StreamEvent::Waiting { position });
    let head = stream::iter(waiting.into_iter().chain(replay));

    let tail: std::pin::Pin<Box<dyn Stream<Item = StreamEvent> + Send>> = match receiver {
        Some(rx) => Box::pin(ReceiverStream::new(rx)),
        None => Box::pin(stream::empty()),
    };

    head.chain(tail).filter_map(|event| async move { to_sse_event(event).map(Ok) })
}

/// Wrap `stream` into an axum SSE response with keepalive comments at
/// `keepalive_interval` (lines beginning with `:`, per the SSE wire
/// format) via axum's built-in `KeepAlive`.
pub fn sse_response<S>(stream: S, keepalive_interval: Duration) -> Sse<S>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(KeepAlive::new().interval(keepalive_interval))
}
