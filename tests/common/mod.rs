//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`AppContext`] on temporary directories with
//! a table-driven prober and a `cat` transcoder, so no ffmpeg is needed.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use mediashelf::config::Config;
use mediashelf::delivery::{DeliveryEngine, Transcoder};
use mediashelf::library;
use mediashelf::server::{create_router, AppContext};
use mediashelf::store::NodeStore;
use mediashelf::sync::{sync_library, MediaProber, SyncSummary, TreeSynchronizer};
use mediashelf_av::Toolchain;
use mediashelf_common::{MediaInfo, Node, Result};
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tower::ServiceExt;

/// Probes by file name: listed names get H.264 1080p with the given duration.
pub struct TableProber(pub HashMap<String, f64>);

#[async_trait]
impl MediaProber for TableProber {
    async fn probe(&self, path: &Path) -> Result<Option<MediaInfo>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.0.get(&name).map(|duration| MediaInfo {
            duration: *duration,
            codec: "H.264".to_string(),
            width: 1920,
            height: 1080,
        }))
    }
}

/// Streams the input file unchanged.
pub struct CatTranscoder;

impl Transcoder for CatTranscoder {
    fn spawn(&self, input: &Path, _start: f64) -> Result<Child> {
        Ok(Command::new("cat")
            .arg(input)
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?)
    }
}

/// Never finishes until killed, so permits stay held.
pub struct StallTranscoder;

impl Transcoder for StallTranscoder {
    fn spawn(&self, _input: &Path, _start: f64) -> Result<Child> {
        Ok(Command::new("sleep")
            .arg("30")
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?)
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub data: TempDir,
    pub library: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(2, Arc::new(CatTranscoder))
    }

    pub fn build(max_transcodes: usize, transcoder: Arc<dyn Transcoder>) -> Self {
        let data = tempfile::tempdir().unwrap();
        let library = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.storage.data_dir = data.path().to_path_buf();
        config.delivery.max_transcodes = max_transcodes;

        let durations = [("e1.mp4", 1200.0), ("e2.mp4", 1300.0), ("movie.mkv", 5400.0)]
            .into_iter()
            .map(|(n, d)| (n.to_string(), d))
            .collect();
        let synchronizer = TreeSynchronizer::new(Arc::new(TableProber(durations)), 4);
        let delivery = DeliveryEngine::new(max_transcodes, transcoder);
        let store = NodeStore::open(data.path()).unwrap();

        let ctx = AppContext::new(
            config,
            store,
            synchronizer,
            delivery,
            None,
            Toolchain::default(),
        );

        Self { ctx, data, library }
    }

    pub fn app(&self) -> Router {
        create_router(self.ctx.clone())
    }

    pub fn root(&self) -> PathBuf {
        self.library.path().to_path_buf()
    }

    /// Create a sparse file of `len` bytes under the library root.
    pub fn sized_file(&self, rel: &str, len: u64) -> PathBuf {
        let path = self.library.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        File::create(&path).unwrap().set_len(len).unwrap();
        path
    }

    /// `movie.mkv` (2,000,000 B) and `S01/{e1,e2}.mp4` (1,000,000 B each).
    pub fn standard_library(&self) {
        self.sized_file("movie.mkv", 2_000_000);
        self.sized_file("S01/e1.mp4", 1_000_000);
        self.sized_file("S01/e2.mp4", 1_000_000);
    }

    pub fn set_root(&self) {
        let root = self.root();
        library::set_root_drive(&self.ctx.store, Some(&root.to_string_lossy())).unwrap();
    }

    /// Sync directly, bypassing HTTP.
    pub async fn sync(&self) -> SyncSummary {
        let quiet = |_: String| {};
        sync_library(&self.ctx.store, &self.ctx.synchronizer, &quiet)
            .await
            .unwrap()
    }

    pub fn tree(&self) -> Vec<Node> {
        self.ctx.store.load_tree().unwrap()
    }

    pub fn node_named(&self, name: &str) -> Node {
        fn find<'a>(nodes: &'a [Node], name: &str) -> Option<&'a Node> {
            nodes.iter().find_map(|n| {
                if n.name == name {
                    Some(n)
                } else {
                    find(&n.children, name)
                }
            })
        }
        let tree = self.tree();
        find(&tree, name)
            .cloned()
            .unwrap_or_else(|| panic!("no node named {}", name))
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.app()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Start an Axum server on a random port.
    pub async fn serve(&self) -> SocketAddr {
        let app = self.app();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        addr
    }
}

pub async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    resp.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

/// Parse the `data:` lines of an SSE body.
pub fn sse_events(body: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}
