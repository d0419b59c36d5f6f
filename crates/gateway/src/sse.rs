//! Re-serialization of unified chunk streams as `text/event-stream`.

use std::convert::Infallible;

use {
    axum::response::sse::{Event, Sse},
    futures::StreamExt,
    tokio_stream::Stream,
};

use switchyard_dispatch::stream::MachineStream;

use crate::error::GatewayError;

/// Serialize the machine's stream as SSE: one `data: <JSON>` line per chunk,
/// an error payload for a terminal failure, and always a final
/// `data: [DONE]`.
pub fn sse_response(
    stream: MachineStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream
        .map(|item| {
            let event = match item {
                Ok(chunk) => {
                    Event::default().data(serde_json::to_string(&chunk).unwrap_or_default())
                },
                Err(e) => {
                    let body = GatewayError::from(e).body();
                    Event::default().data(serde_json::to_string(&body).unwrap_or_default())
                },
            };
            Ok(event)
        })
        .chain(futures::stream::once(async {
            Ok(Event::default().data("[DONE]"))
        }));
    Sse::new(events)
}
