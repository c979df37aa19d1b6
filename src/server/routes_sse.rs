use crate::error::Error;
use crate::server::AppContext;
use crate::state::SessionEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/sessions/:id/events", get(session_events))
}

/// Per-session event stream: upload/extract progress, script deltas (the
/// growing accumulator), completion, warnings, and failures.
pub async fn session_events(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let session = ctx.sessions.get(id).map_err(Error::http)?;
    let rx = session.subscribe();

    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event: SessionEvent| {
            // Unnamed SSE events; event_type lives in the JSON data so a
            // single onmessage handler can route everything client-side.
            let data = serde_json::to_string(&event)
                .unwrap_or_else(|e| format!(r#"{{"error": "serialization failed: {}"}}"#, e));
            Ok(Event::default().data(data))
        });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
