//! Integration tests for root drive configuration and SSE sync.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_bytes, body_json, sse_events, TestHarness};
use tower::ServiceExt;

async fn put_root(h: &TestHarness, body: serde_json::Value) -> axum::http::Response<Body> {
    h.app()
        .oneshot(
            Request::put("/api/root-drive")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn root_drive_requires_drive() {
    let h = TestHarness::new();
    let resp = put_root(&h, serde_json::json!({})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["code"], "invalid_input");
    assert!(body["error"].as_str().unwrap().contains("Drive is required"));
}

#[tokio::test]
async fn sync_streams_progress_and_persists_tree() {
    let h = TestHarness::new();
    h.standard_library();

    let resp = put_root(&h, serde_json::json!({ "drive": h.root() })).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["message"], "Root drive updated");

    let resp = h.get("/api/sync").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    let events = sse_events(&body_bytes(resp).await);

    let first = events.first().unwrap();
    assert_eq!(first["status"], "start");
    assert!(first["message"].as_str().unwrap().starts_with("Starting sync on"));

    let last = events.last().unwrap();
    assert_eq!(last["status"], "done");
    assert_eq!(last["message"], "Sync Completed");
    assert_eq!(last["summary"]["total_files"], 3);
    assert_eq!(last["summary"]["root_children"], 2);
    assert_eq!(events.iter().filter(|e| e["status"] == "done").count(), 1);

    let tree = h.tree();
    assert_eq!(tree.iter().map(|n| n.size).sum::<u64>(), 4_000_000);
    let season = h.node_named("S01");
    assert_eq!(season.size, 2_000_000);
    let info = season.media_info.unwrap();
    assert_eq!(info.codec, "mixed");
    assert_eq!(info.duration, 2500.0);
}

#[tokio::test]
async fn sync_without_root_reports_error_event() {
    let h = TestHarness::new();
    let events = sse_events(&body_bytes(h.get("/api/sync").await).await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["status"], "error");
    assert_eq!(events[0]["message"], "Root drive not set");
}

#[tokio::test]
async fn concurrent_sync_is_rejected() {
    let h = TestHarness::new();
    h.standard_library();
    h.set_root();

    let _guard = h.ctx.sync_lock.try_acquire().unwrap();
    let resp = h.get("/api/sync").await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn resync_keeps_ids_of_unchanged_files() {
    let h = TestHarness::new();
    h.standard_library();
    h.set_root();

    h.sync().await;
    let before = h.node_named("e1.mp4");
    h.sync().await;
    assert_eq!(h.node_named("e1.mp4"), before);

    h.sized_file("S01/e3.mp4", 10);
    let summary = h.sync().await;
    assert_eq!(summary.total_files, 4);
    assert_eq!(h.node_named("e1.mp4").id, before.id);
}

#[cfg(unix)]
#[tokio::test]
async fn sync_skips_unreadable_entries() {
    let h = TestHarness::new();
    h.standard_library();
    std::os::unix::fs::symlink(h.library.path().join("nowhere"), h.library.path().join("lost.mkv"))
        .unwrap();
    h.set_root();

    let events = sse_events(&body_bytes(h.get("/api/sync").await).await);
    assert!(events.iter().any(|e| e["status"] == "progress"
        && e["message"].as_str().unwrap_or("").starts_with("Skipped: lost.mkv")));
    let last = events.last().unwrap();
    assert_eq!(last["status"], "done");
    assert_eq!(last["summary"]["total_files"], 3);
}
