use axum::{extract::State, response::IntoResponse, routing::get, Router};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::sse::progress_sse;
use super::{ApiResult, AppContext};
use crate::library;
use crate::progress::ProgressEvent;
use crate::sync::sync_library;

pub fn sync_routes() -> Router<AppContext> {
    Router::new().route("/sync", get(sync_handler))
}

/// Run a sync in the background and stream its progress.
///
/// The run continues to completion if the client goes away; the new tree is
/// persisted either way.
pub async fn sync_handler(State(ctx): State<AppContext>) -> ApiResult<impl IntoResponse> {
    let guard = ctx.sync_lock.try_acquire()?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let _guard = guard;

        let root = match library::root_drive(&ctx.store) {
            Ok(Some(root)) => root,
            Ok(None) => {
                let _ = tx.send(ProgressEvent::error("Root drive not set"));
                return;
            }
            Err(e) => {
                let _ = tx.send(ProgressEvent::error(e.to_string()));
                return;
            }
        };
        let _ = tx.send(ProgressEvent::start(format!(
            "Starting sync on {}",
            root.display()
        )));

        let progress_tx = tx.clone();
        let sink = move |message: String| {
            let _ = progress_tx.send(ProgressEvent::progress(message));
        };

        let event = match sync_library(&ctx.store, &ctx.synchronizer, &sink).await {
            Ok(summary) => ProgressEvent::done("Sync Completed").with("summary", summary),
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "Sync failed");
                ProgressEvent::error(e.to_string())
            }
        };
        let _ = tx.send(event);
    });

    Ok(progress_sse(UnboundedReceiverStream::new(rx)))
}
