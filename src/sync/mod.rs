//! Incremental library synchronization.
//!
//! A sync walks the library root and builds a fresh tree, carrying ids and
//! cached fields forward from the previous tree by path. Files whose
//! modification time is unchanged keep everything; changed files keep only
//! their id. Directory sizes and aggregate durations are always recomputed
//! from the new children.
//!
//! Symbolic links are followed. A directory link that resolves to one of its
//! own ancestors is skipped, as is a dangling link. `concurrency` caps the
//! stat and probe work in flight across the whole walk, not per directory.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use mediashelf_common::paths::is_video_file;
use mediashelf_common::{flatten_files, index_by_path, Error, MediaInfo, Node, NodeKind, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::store::NodeStore;

/// Receives human-readable progress lines during a sync.
pub type ProgressSink<'a> = &'a (dyn Fn(String) + Send + Sync);

/// Source of technical info for video files.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// `Ok(None)` when the file has no video stream.
    async fn probe(&self, path: &Path) -> Result<Option<MediaInfo>>;
}

/// [`MediaProber`] backed by the ffprobe executable.
pub struct FfprobeProber {
    ffprobe: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<Option<MediaInfo>> {
        let report = mediashelf_av::probe::probe(&self.ffprobe, path).await?;
        Ok(report.media_info())
    }
}

/// Builds a new tree from disk and the previous tree.
pub struct TreeSynchronizer {
    prober: Arc<dyn MediaProber>,
    concurrency: usize,
}

impl TreeSynchronizer {
    pub fn new(prober: Arc<dyn MediaProber>, concurrency: usize) -> Self {
        Self {
            prober,
            concurrency: concurrency.max(1),
        }
    }

    /// Walk `root` and return its children as a new tree.
    ///
    /// Fails only when `root` itself cannot be listed. Unreadable entries
    /// below it are skipped and reported through `progress`.
    pub async fn sync(
        &self,
        root: &Path,
        previous: &[Node],
        progress: ProgressSink<'_>,
    ) -> Result<Vec<Node>> {
        let entries = list_dir(root)
            .await
            .map_err(|e| Error::source_unreadable(root, e))?;

        let ancestors = match tokio::fs::canonicalize(root).await {
            Ok(real) => vec![real],
            Err(e) => return Err(Error::source_unreadable(root, e)),
        };

        let index = index_by_path(previous);
        let walk = Walk {
            prober: self.prober.as_ref(),
            index: &index,
            progress,
            concurrency: self.concurrency,
            limit: Semaphore::new(self.concurrency),
        };

        info!(root = %root.display(), entries = entries.len(), "Starting sync");
        Ok(walk.build_entries(entries, &ancestors).await)
    }
}

struct Walk<'a> {
    prober: &'a dyn MediaProber,
    index: &'a HashMap<&'a Path, &'a Node>,
    progress: ProgressSink<'a>,
    concurrency: usize,
    /// Shared by every level of the walk.
    limit: Semaphore,
}

impl<'a> Walk<'a> {
    /// `ancestors` are the resolved paths from the root down to `dir`.
    fn scan_dir(&'a self, dir: PathBuf, ancestors: Vec<PathBuf>) -> BoxFuture<'a, Vec<Node>> {
        async move {
            let listed = {
                let _permit = self.limit.acquire().await;
                list_dir(&dir).await
            };
            match listed {
                Ok(entries) => self.build_entries(entries, &ancestors).await,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Cannot list directory");
                    Vec::new()
                }
            }
        }
        .boxed()
    }

    async fn build_entries(
        &'a self,
        entries: Vec<(String, PathBuf)>,
        ancestors: &[PathBuf],
    ) -> Vec<Node> {
        futures::stream::iter(entries)
            .map(|(name, path)| self.build_node(name, path, ancestors))
            .buffered(self.concurrency)
            .filter_map(futures::future::ready)
            .collect()
            .await
    }

    async fn build_node(
        &'a self,
        name: String,
        path: PathBuf,
        ancestors: &[PathBuf],
    ) -> Option<Node> {
        (self.progress)(format!("Scanning: {}", name));

        let stat = {
            let _permit = self.limit.acquire().await;
            tokio::fs::metadata(&path).await
        };
        let metadata = match stat {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                (self.progress)(format!("Skipped: {} ({})", name, e));
                return None;
            }
        };

        let mut lineage = Vec::new();
        if metadata.is_dir() {
            let real = match tokio::fs::canonicalize(&path).await {
                Ok(real) => real,
                Err(e) => {
                    (self.progress)(format!("Skipped: {} ({})", name, e));
                    return None;
                }
            };
            if ancestors.contains(&real) {
                debug!(path = %path.display(), "Skipping directory link loop");
                (self.progress)(format!("Skipped: {} (link loop)", name));
                return None;
            }
            lineage = ancestors.to_vec();
            lineage.push(real);
        }

        let kind = if metadata.is_dir() {
            NodeKind::Directory
        } else {
            NodeKind::File
        };
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
            .trunc_subsecs(3);

        let mut node = Node::new(name, path, kind, modified_at);
        let unchanged = self.carry_forward(&mut node);

        match kind {
            NodeKind::Directory => {
                node.children = self.scan_dir(node.path.clone(), lineage).await;
                node.size = node.children.iter().map(|c| c.size).sum();

                let duration: f64 = node.children.iter().map(Node::duration).sum();
                node.media_info = (duration > 0.0).then(|| MediaInfo::aggregate(duration));
            }
            NodeKind::File => {
                node.size = metadata.len();
                if is_video_file(&node.path) && (!unchanged || node.media_info.is_none()) {
                    (self.progress)(format!("Analyzing Video: {}...", node.name));
                    let probed = {
                        let _permit = self.limit.acquire().await;
                        self.prober.probe(&node.path).await
                    };
                    match probed {
                        Ok(Some(info)) => node.media_info = Some(info),
                        Ok(None) => {}
                        Err(e) => warn!(path = %node.path.display(), error = %e, "Probe failed"),
                    }
                }
            }
        }

        Some(node)
    }

    /// Link `node` to its previous version. Returns whether it is unchanged.
    fn carry_forward(&self, node: &mut Node) -> bool {
        let Some(previous) = self.index.get(node.path.as_path()) else {
            return false;
        };

        node.id = previous.id;
        let unchanged = previous.kind == node.kind
            && (node.is_dir() || previous.modified_at == node.modified_at);

        if unchanged {
            node.metadata = previous.metadata.clone();
            node.subtitles = previous.subtitles.clone();
            if node.is_file() {
                node.media_info = previous.media_info.clone();
            }
        } else {
            (self.progress)(format!("File Changed: {} (Resetting Meta)", node.name));
        }
        unchanged
    }
}

/// Immediate entries of `dir`, sorted by name.
async fn list_dir(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        entries.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// Rejects a second sync while one is running.
#[derive(Clone, Default)]
pub struct SyncLock(Arc<AtomicBool>);

impl SyncLock {
    pub fn try_acquire(&self) -> Result<SyncGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Conflict("Sync already in progress".to_string()))?;
        Ok(SyncGuard(self.0.clone()))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Held for the duration of a sync.
pub struct SyncGuard(Arc<AtomicBool>);

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    pub total_files: usize,
    pub root_children: usize,
    pub total_size: u64,
}

/// Sync the configured root drive and persist the new tree.
pub async fn sync_library(
    store: &NodeStore,
    synchronizer: &TreeSynchronizer,
    progress: ProgressSink<'_>,
) -> Result<SyncSummary> {
    let root = store
        .load_library_config()?
        .root_drive
        .ok_or_else(|| Error::invalid_input("Root drive not set"))?;
    let previous = store.load_tree()?;

    let tree = synchronizer.sync(&root, &previous, progress).await?;
    store.save_tree(&tree)?;

    let summary = SyncSummary {
        total_files: flatten_files(&tree).len(),
        root_children: tree.len(),
        total_size: tree.iter().map(|n| n.size).sum(),
    };
    info!(
        files = summary.total_files,
        size = summary.total_size,
        "Sync complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs::File;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// Returns durations keyed by file name and counts calls.
    #[derive(Default)]
    struct FakeProber {
        durations: HashMap<String, f64>,
        calls: AtomicUsize,
    }

    impl FakeProber {
        fn with(entries: &[(&str, f64)]) -> Self {
            Self {
                durations: entries.iter().map(|(n, d)| (n.to_string(), *d)).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaProber for FakeProber {
        async fn probe(&self, path: &Path) -> Result<Option<MediaInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = path.file_name().unwrap().to_string_lossy();
            Ok(self.durations.get(name.as_ref()).map(|d| MediaInfo {
                duration: *d,
                codec: "H.264".to_string(),
                width: 1920,
                height: 1080,
            }))
        }
    }

    fn sized_file(path: &Path, len: u64) {
        File::create(path).unwrap().set_len(len).unwrap();
    }

    fn library() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        sized_file(&dir.path().join("movie.mkv"), 2_000_000);
        std::fs::create_dir(dir.path().join("S01")).unwrap();
        sized_file(&dir.path().join("S01/e1.mp4"), 1_000_000);
        sized_file(&dir.path().join("S01/e2.mp4"), 1_000_000);
        dir
    }

    fn synchronizer(prober: Arc<FakeProber>) -> TreeSynchronizer {
        TreeSynchronizer::new(prober, 4)
    }

    fn quiet(_: String) {}

    #[tokio::test]
    async fn test_aggregates_sizes_and_durations() {
        let dir = library();
        let prober = Arc::new(FakeProber::with(&[("e1.mp4", 1200.0), ("e2.mp4", 1300.0)]));
        let tree = synchronizer(prober).sync(dir.path(), &[], &quiet).await.unwrap();

        assert_eq!(tree.len(), 2);
        let names: Vec<_> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["S01", "movie.mkv"]);

        let season = &tree[0];
        assert_eq!(season.size, 2_000_000);
        let info = season.media_info.as_ref().unwrap();
        assert_eq!(info.codec, "mixed");
        assert_eq!(info.duration, 2500.0);
        assert_eq!((info.width, info.height), (0, 0));

        assert_eq!(tree.iter().map(|n| n.size).sum::<u64>(), 4_000_000);
        assert!(tree[1].media_info.is_none());
    }

    #[tokio::test]
    async fn test_unchanged_files_keep_identity_and_cache() {
        let dir = library();
        let prober = Arc::new(FakeProber::with(&[("e1.mp4", 1200.0), ("e2.mp4", 1300.0)]));
        let sync = synchronizer(prober.clone());

        let mut first = sync.sync(dir.path(), &[], &quiet).await.unwrap();
        first[0].children[0].subtitles.push(mediashelf_common::Subtitle {
            label: "English".into(),
            language: "en".into(),
            path: PathBuf::from("/subs/e1.srt"),
        });
        let probes_after_first = prober.calls.load(Ordering::SeqCst);

        let second = sync.sync(dir.path(), &first, &quiet).await.unwrap();
        assert_eq!(second, first);
        // Only movie.mkv (no cached info) is probed again.
        assert_eq!(prober.calls.load(Ordering::SeqCst), probes_after_first + 1);
    }

    #[tokio::test]
    async fn test_changed_file_resets_cache_but_keeps_id() {
        let dir = library();
        let prober = Arc::new(FakeProber::with(&[("e1.mp4", 1200.0), ("e2.mp4", 1300.0)]));
        let sync = synchronizer(prober);

        let mut first = sync.sync(dir.path(), &[], &quiet).await.unwrap();
        first[0].children[0].subtitles.push(mediashelf_common::Subtitle {
            label: "x".into(),
            language: "en".into(),
            path: PathBuf::from("/subs/x.srt"),
        });

        let e1 = dir.path().join("S01/e1.mp4");
        let later = SystemTime::now() + Duration::from_secs(3600);
        File::options().write(true).open(&e1).unwrap().set_modified(later).unwrap();

        let messages = Mutex::new(Vec::new());
        let record = |m: String| messages.lock().push(m);
        let second = sync.sync(dir.path(), &first, &record).await.unwrap();

        let old = &first[0].children[0];
        let new = &second[0].children[0];
        assert_eq!(new.id, old.id);
        assert!(new.subtitles.is_empty());
        // Re-probed, so media_info is fresh rather than carried.
        assert_eq!(new.media_info.as_ref().unwrap().duration, 1200.0);
        assert!(messages
            .lock()
            .contains(&"File Changed: e1.mp4 (Resetting Meta)".to_string()));
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_changed() {
        let dir = tempfile::tempdir().unwrap();
        sized_file(&dir.path().join("thing"), 10);
        let sync = synchronizer(Arc::new(FakeProber::default()));
        let mut first = sync.sync(dir.path(), &[], &quiet).await.unwrap();
        first[0].subtitles.push(mediashelf_common::Subtitle {
            label: "x".into(),
            language: "en".into(),
            path: PathBuf::from("/s.srt"),
        });

        std::fs::remove_file(dir.path().join("thing")).unwrap();
        std::fs::create_dir(dir.path().join("thing")).unwrap();

        let second = sync.sync(dir.path(), &first, &quiet).await.unwrap();
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].kind, NodeKind::Directory);
        assert!(second[0].subtitles.is_empty());
    }

    #[tokio::test]
    async fn test_removed_paths_disappear() {
        let dir = library();
        let sync = synchronizer(Arc::new(FakeProber::default()));
        let first = sync.sync(dir.path(), &[], &quiet).await.unwrap();

        std::fs::remove_file(dir.path().join("movie.mkv")).unwrap();
        let second = sync.sync(dir.path(), &first, &quiet).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
    }

    #[tokio::test]
    async fn test_unreadable_root() {
        let dir = tempfile::tempdir().unwrap();
        let sync = synchronizer(Arc::new(FakeProber::default()));
        let err = sync
            .sync(&dir.path().join("missing"), &[], &quiet)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnreadable { .. }));
    }

    #[test]
    fn test_sync_lock_is_exclusive() {
        let lock = SyncLock::default();
        let guard = lock.try_acquire().unwrap();
        assert!(lock.is_running());
        assert!(matches!(lock.try_acquire(), Err(Error::Conflict(_))));
        drop(guard);
        assert!(!lock.is_running());
        assert!(lock.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_sync_library_requires_root() {
        let data = tempfile::tempdir().unwrap();
        let store = NodeStore::open(data.path()).unwrap();
        let sync = synchronizer(Arc::new(FakeProber::default()));
        let err = sync_library(&store, &sync, &quiet).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_sync_library_persists_tree() {
        let dir = library();
        let data = tempfile::tempdir().unwrap();
        let store = NodeStore::open(data.path()).unwrap();
        store
            .save_library_config(&crate::store::LibraryConfig {
                root_drive: Some(dir.path().to_path_buf()),
            })
            .unwrap();

        let sync = synchronizer(Arc::new(FakeProber::default()));
        let summary = sync_library(&store, &sync, &quiet).await.unwrap();
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.root_children, 2);
        assert_eq!(summary.total_size, 4_000_000);
        assert_eq!(store.load_tree().unwrap().len(), 2);
    }

    /// Records the highest number of probes running at once.
    #[derive(Default)]
    struct CountingProber {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MediaProber for CountingProber {
        async fn probe(&self, _path: &Path) -> Result<Option<MediaInfo>> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    struct BrokenProber;

    #[async_trait]
    impl MediaProber for BrokenProber {
        async fn probe(&self, path: &Path) -> Result<Option<MediaInfo>> {
            Err(Error::internal(format!("cannot read {}", path.display())))
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_global_across_levels() {
        let dir = tempfile::tempdir().unwrap();
        for a in ["A", "B", "C"] {
            for b in ["x", "y", "z"] {
                let sub = dir.path().join(a).join(b);
                std::fs::create_dir_all(&sub).unwrap();
                for n in 0..3 {
                    sized_file(&sub.join(format!("ep{}.mp4", n)), 10);
                }
            }
        }

        let prober = Arc::new(CountingProber::default());
        let sync = TreeSynchronizer::new(prober.clone(), 2);
        let tree = sync.sync(dir.path(), &[], &quiet).await.unwrap();

        assert_eq!(flatten_files(&tree).len(), 27);
        let peak = prober.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak concurrency {}", peak);
    }

    #[tokio::test]
    async fn test_probe_failure_is_not_fatal() {
        let dir = library();
        let sync = TreeSynchronizer::new(Arc::new(BrokenProber), 4);
        let tree = sync.sync(dir.path(), &[], &quiet).await.unwrap();

        assert_eq!(flatten_files(&tree).len(), 3);
        assert!(flatten_files(&tree).iter().all(|f| f.media_info.is_none()));
        assert!(tree[0].media_info.is_none());
        assert_eq!(tree[0].size, 2_000_000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_link_is_skipped() {
        let dir = library();
        std::os::unix::fs::symlink(dir.path().join("gone.mkv"), dir.path().join("broken.mkv")).unwrap();

        let messages = Mutex::new(Vec::new());
        let record = |m: String| messages.lock().push(m);
        let tree = synchronizer(Arc::new(FakeProber::default()))
            .sync(dir.path(), &[], &record)
            .await
            .unwrap();

        let names: Vec<_> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["S01", "movie.mkv"]);
        assert!(messages.lock().iter().any(|m| m.starts_with("Skipped: broken.mkv (")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_links_followed_without_loops() {
        let dir = tempfile::tempdir().unwrap();
        let show = dir.path().join("show");
        std::fs::create_dir(&show).unwrap();
        sized_file(&show.join("a.txt"), 5);
        let outside = tempfile::tempdir().unwrap();
        sized_file(&outside.path().join("b.txt"), 7);
        std::os::unix::fs::symlink(outside.path(), show.join("extras")).unwrap();
        std::os::unix::fs::symlink(&show, show.join("again")).unwrap();

        let messages = Mutex::new(Vec::new());
        let record = |m: String| messages.lock().push(m);
        let tree = synchronizer(Arc::new(FakeProber::default()))
            .sync(dir.path(), &[], &record)
            .await
            .unwrap();

        let show = &tree[0];
        let names: Vec<_> = show.children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "extras"]);
        assert_eq!(show.children[1].kind, NodeKind::Directory);
        assert_eq!(show.children[1].children[0].name, "b.txt");
        assert_eq!(show.size, 12);
        assert!(messages.lock().contains(&"Skipped: again (link loop)".to_string()));
    }
}
