//! Progress streams as server-sent events.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;

use crate::progress::ProgressEvent;

/// Serialize each event as one unnamed `data:` line.
///
/// The body ends after the terminal event even if the source stays open.
pub fn progress_sse<S>(events: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ProgressEvent> + Send + 'static,
{
    let mut finished = false;
    let stream = events
        .take_while(move |event| {
            let keep = !finished;
            finished = finished || event.is_terminal();
            futures::future::ready(keep)
        })
        .map(|event| {
            let event = Event::default().json_data(&event).unwrap_or_else(|e| {
                Event::default().data(format!(
                    r#"{{"status":"error","message":"serialization failed: {}"}}"#,
                    e
                ))
            });
            Ok(event)
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
