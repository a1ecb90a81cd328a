//! Zip export of library directories.
//!
//! [`ArchiveStreamer::start`] compresses a directory on the blocking pool and
//! yields progress events as a stream. Work happens in a uniquely named
//! `.part` file that is renamed to `<id>.zip` only once the archive is
//! complete, so the hand-off name never refers to a half-written file.
//! Dropping or cancelling the job before it finishes aborts compression and
//! deletes the partial archive. The finished archive waits in the scratch
//! directory until it is downloaded once through [`DeleteOnEof`].
//!
//! Symbolic links are followed. Links back to an ancestor directory and
//! dangling links are left out of the archive.

use bytes::Bytes;
use futures::Stream;
use mediashelf_common::{find_by_id, Error, Node, NodeId, Result};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::progress::ProgressEvent;

const CHUNK_SIZE: usize = 64 * 1024;
const EVENT_BUFFER: usize = 32;

/// Level used for one-shot downloads.
pub const ONE_SHOT_LEVEL: u32 = 9;

/// URL under which a finished archive is handed off.
pub fn download_url(file_name: &str) -> String {
    format!("/api/download/temp/{}", file_name)
}

pub struct ArchiveStreamer {
    scratch_dir: PathBuf,
    level: u32,
}

impl ArchiveStreamer {
    pub fn new(scratch_dir: impl Into<PathBuf>, level: u32) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            level: level.min(9),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Start compressing directory `id` into `<scratch>/<id>.zip`.
    ///
    /// Fails with `NotFound` before touching the filesystem when `id` is not
    /// a directory.
    pub fn start(&self, tree: &[Node], id: NodeId) -> Result<ArchiveJob> {
        let node = find_directory(tree, id)?;
        let file_name = format!("{}.zip", id);
        let output = self.partial_path(id);
        let finished = self.scratch_dir.join(&file_name);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let completed = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_job(
            JobSpec {
                root: node.path.clone(),
                output,
                level: self.level,
                expected_total: node.size,
            },
            finished,
            file_name,
            tx,
            cancel.clone(),
            completed.clone(),
        ));

        info!(node = %id, path = %node.path.display(), level = self.level, "Archive started");
        Ok(ArchiveJob {
            events: rx,
            cancel,
            completed,
            task: Some(task),
        })
    }

    /// Compress directory `id` at [`ONE_SHOT_LEVEL`] without progress.
    ///
    /// The archive is removed as soon as the returned [`ScratchFile`] is
    /// dropped. If the caller goes away mid-build, compression is aborted and
    /// nothing is left behind.
    pub async fn build(&self, tree: &[Node], id: NodeId) -> Result<(ScratchFile, u64)> {
        let node = find_directory(tree, id)?;
        let spec = JobSpec {
            root: node.path.clone(),
            output: self.partial_path(id),
            level: ONE_SHOT_LEVEL,
            expected_total: node.size,
        };

        let cancel = CancellationToken::new();
        let _abort_on_drop = cancel.clone().drop_guard();
        tokio::task::spawn_blocking(move || -> Result<(ScratchFile, u64)> {
            let file = ScratchFile::new(spec.output.clone());
            let size = compress(&spec, None, &cancel).map_err(CompressError::into_error)?;
            Ok((file, size))
        })
        .await
        .map_err(|e| Error::internal(format!("archive task failed: {}", e)))?
    }

    fn partial_path(&self, id: NodeId) -> PathBuf {
        self.scratch_dir
            .join(format!("{}.{}.zip.part", id, uuid::Uuid::new_v4()))
    }

    /// Resolve a hand-off file name to a finished archive in the scratch dir.
    ///
    /// Names that could escape the directory, or do not exist, yield `None`.
    pub fn finished_archive(&self, file_name: &str) -> Option<PathBuf> {
        let plain = !file_name.is_empty()
            && !file_name.contains(['/', '\\'])
            && !file_name.contains("..")
            && file_name.ends_with(".zip");
        if !plain {
            return None;
        }
        let path = self.scratch_dir.join(file_name);
        path.is_file().then_some(path)
    }
}

fn find_directory(tree: &[Node], id: NodeId) -> Result<&Node> {
    find_by_id(tree, id)
        .filter(|n| n.is_dir())
        .ok_or_else(|| Error::not_found("directory", id))
}

/// How a cancel request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Compression was aborted and the partial file removed.
    Cancelled,
    /// A terminal event had already been claimed; nothing was undone.
    AlreadyCompleted,
}

/// A running archive. Yields progress events ending in one `done` or `error`.
pub struct ArchiveJob {
    events: mpsc::Receiver<ProgressEvent>,
    cancel: CancellationToken,
    completed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ArchiveJob {
    /// Abort the job unless it already finished, and wait for cleanup.
    pub async fn cancel(mut self) -> ArchiveOutcome {
        let outcome = self.request_cancel();
        // Unblocks a worker waiting on a full channel.
        self.events.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Archive task ended abnormally: {}", e);
            }
        }
        outcome
    }

    fn request_cancel(&self) -> ArchiveOutcome {
        if claim(&self.completed) {
            self.cancel.cancel();
            ArchiveOutcome::Cancelled
        } else {
            ArchiveOutcome::AlreadyCompleted
        }
    }
}

impl Stream for ArchiveJob {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for ArchiveJob {
    fn drop(&mut self) {
        if self.request_cancel() == ArchiveOutcome::Cancelled {
            debug!("Archive consumer went away, aborting");
        }
    }
}

fn claim(completed: &AtomicBool) -> bool {
    completed
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

struct JobSpec {
    root: PathBuf,
    output: PathBuf,
    level: u32,
    expected_total: u64,
}

enum CompressError {
    Cancelled,
    Failed(Error),
}

impl CompressError {
    fn into_error(self) -> Error {
        match self {
            CompressError::Cancelled => Error::internal("archive cancelled"),
            CompressError::Failed(e) => e,
        }
    }
}

impl From<std::io::Error> for CompressError {
    fn from(e: std::io::Error) -> Self {
        CompressError::Failed(Error::Io(e))
    }
}

impl From<zip::result::ZipError> for CompressError {
    fn from(e: zip::result::ZipError) -> Self {
        CompressError::Failed(Error::internal(format!("zip: {}", e)))
    }
}

async fn run_job(
    spec: JobSpec,
    finished: PathBuf,
    file_name: String,
    tx: mpsc::Sender<ProgressEvent>,
    cancel: CancellationToken,
    completed: Arc<AtomicBool>,
) {
    let _ = tx
        .send(ProgressEvent::start("Starting compression..."))
        .await;

    let output = spec.output.clone();
    let progress_tx = tx.clone();
    let worker_cancel = cancel.clone();
    let result =
        tokio::task::spawn_blocking(move || compress(&spec, Some(&progress_tx), &worker_cancel))
            .await
            .unwrap_or_else(|e| {
                Err(CompressError::Failed(Error::internal(format!(
                    "archive task failed: {}",
                    e
                ))))
            });

    match result {
        Ok(size) if claim(&completed) => {
            if let Err(e) = tokio::fs::rename(&output, &finished).await {
                warn!(file = %file_name, error = %e, "Failed to publish archive");
                remove_quietly(&output);
                let _ = tx.send(ProgressEvent::error(Error::Io(e).to_string())).await;
                return;
            }
            info!(file = %file_name, size, "Archive ready");
            let done = ProgressEvent::done("Archive ready")
                .with_percent(100)
                .with("download_url", download_url(&file_name))
                .with("size", size);
            let _ = tx.send(done).await;
        }
        Err(CompressError::Failed(e)) if claim(&completed) => {
            warn!(file = %file_name, error = %e, "Archive failed");
            remove_quietly(&output);
            let _ = tx.send(ProgressEvent::error(e.to_string())).await;
        }
        _ => {
            info!(file = %file_name, "Archive aborted, removing partial file");
            remove_quietly(&output);
        }
    }
}

fn compress(
    spec: &JobSpec,
    progress: Option<&mpsc::Sender<ProgressEvent>>,
    cancel: &CancellationToken,
) -> std::result::Result<u64, CompressError> {
    let method = if spec.level == 0 {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    let options = SimpleFileOptions::default()
        .compression_method(method)
        .compression_level((spec.level > 0).then_some(spec.level as i64))
        .large_file(true);

    let mut zip = ZipWriter::new(File::create(&spec.output)?);
    let total = spec.expected_total.max(1);
    let mut processed: u64 = 0;
    let mut last_percent: Option<u8> = None;
    let mut buf = vec![0u8; CHUNK_SIZE];

    let walker = WalkDir::new(&spec.root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        if cancel.is_cancelled() {
            return Err(CompressError::Cancelled);
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_skippable_link(&e) => {
                warn!(error = %e, "Leaving link out of archive");
                continue;
            }
            Err(e) => {
                return Err(CompressError::Failed(Error::internal(format!(
                    "walk {}: {}",
                    spec.root.display(),
                    e
                ))))
            }
        };

        let name = entry_name(&spec.root, entry.path());
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
            continue;
        }

        zip.start_file(name, options)?;
        let mut input = File::open(entry.path())?;
        loop {
            if cancel.is_cancelled() {
                return Err(CompressError::Cancelled);
            }
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            zip.write_all(&buf[..n])?;
            processed += n as u64;

            if let Some(tx) = progress {
                let percent = ((processed as f64 / total as f64) * 100.0).round().min(99.0) as u8;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    let event = ProgressEvent::percent(percent).with("processed", processed);
                    if tx.blocking_send(event).is_err() {
                        return Err(CompressError::Cancelled);
                    }
                }
            }
        }
    }

    let file = zip.finish()?;
    Ok(file.metadata()?.len())
}

/// Link loops and dangling links below the root.
fn is_skippable_link(err: &walkdir::Error) -> bool {
    if err.depth() == 0 {
        return false;
    }
    err.loop_ancestor().is_some()
        || err
            .io_error()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}

/// Archive entry name: path relative to the root with `/` separators.
fn entry_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove archive");
        }
    }
}

/// A file in the scratch directory that is removed when dropped.
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}

/// Response body for a one-shot archive. The file goes away with the body,
/// whether the download completed or not.
pub struct OneShotBody {
    inner: ReaderStream<tokio::fs::File>,
    _file: ScratchFile,
}

impl OneShotBody {
    pub async fn open(file: ScratchFile) -> Result<(Self, u64)> {
        let handle = tokio::fs::File::open(file.path()).await?;
        let len = handle.metadata().await?.len();
        Ok((
            Self {
                inner: ReaderStream::new(handle),
                _file: file,
            },
            len,
        ))
    }
}

impl Stream for OneShotBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Response body that deletes its file once every byte has been read.
///
/// A body dropped early (client disconnect) leaves the file in place so the
/// download can be retried.
pub struct DeleteOnEof {
    inner: ReaderStream<tokio::fs::File>,
    path: Option<PathBuf>,
}

impl DeleteOnEof {
    pub async fn open(path: PathBuf) -> Result<(Self, u64)> {
        let file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok((
            Self {
                inner: ReaderStream::new(file),
                path: Some(path),
            },
            len,
        ))
    }
}

impl Stream for DeleteOnEof {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = poll {
            if let Some(path) = self.path.take() {
                debug!(path = %path.display(), "Download complete, removing file");
                remove_quietly(&path);
            }
        }
        poll
    }
}
