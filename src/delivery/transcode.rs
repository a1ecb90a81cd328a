//! Transcoded response bodies.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{ready, FutureExt, Stream};
use mediashelf_common::{Error, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::ExitStatus;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Starts a transcode process whose stdout is the response body.
pub trait Transcoder: Send + Sync {
    /// Spawn with stdout piped and `kill_on_drop` set.
    fn spawn(&self, input: &Path, start: f64) -> Result<Child>;
}

pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn spawn(&self, input: &Path, start: f64) -> Result<Child> {
        Ok(mediashelf_av::transcode::spawn_transcode(
            &self.ffmpeg,
            input,
            start,
        )?)
    }
}

/// A running transcode, streamed as the response body.
///
/// Owns the child and one delivery permit. The permit is returned when the
/// output ends or fails, or when the body is dropped (client gone), which
/// also kills the child. After the last byte the child is reaped; a non-zero
/// exit ends the body with an error instead of a clean EOF.
pub struct TranscodeStream {
    stdout: ReaderStream<ChildStdout>,
    permit: Option<OwnedSemaphorePermit>,
    stage: Stage,
}

enum Stage {
    Streaming(Child),
    Reaping(BoxFuture<'static, std::io::Result<ExitStatus>>),
    Finished,
}

impl TranscodeStream {
    pub(crate) fn new(mut child: Child, permit: OwnedSemaphorePermit) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("transcoder stdout was not piped"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }
        Ok(Self {
            stdout: ReaderStream::new(stdout),
            permit: Some(permit),
            stage: Stage::Streaming(child),
        })
    }

    /// Whether this stream still holds its delivery permit.
    pub fn holds_permit(&self) -> bool {
        self.permit.is_some()
    }

    fn release(&mut self) {
        if self.permit.take().is_some() {
            debug!("Transcode output finished, permit released");
        }
    }
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            warn!(target: "mediashelf::transcode", "ffmpeg: {}", line.trim());
        }
    }
}

impl Stream for TranscodeStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.stage {
                Stage::Streaming(_) => match Pin::new(&mut this.stdout).poll_next(cx) {
                    Poll::Ready(None) => {
                        this.release();
                        if let Stage::Streaming(mut child) =
                            std::mem::replace(&mut this.stage, Stage::Finished)
                        {
                            this.stage = Stage::Reaping(async move { child.wait().await }.boxed());
                        }
                    }
                    Poll::Ready(Some(Err(e))) => {
                        this.release();
                        warn!(error = %e, "Reading transcode output failed");
                        this.stage = Stage::Finished;
                        return Poll::Ready(Some(Err(e)));
                    }
                    other => return other,
                },
                Stage::Reaping(wait) => {
                    let status = ready!(wait.as_mut().poll(cx));
                    this.stage = Stage::Finished;
                    return match status {
                        Ok(status) if status.success() => Poll::Ready(None),
                        Ok(status) => {
                            warn!(%status, "Transcoder exited with failure");
                            Poll::Ready(Some(Err(std::io::Error::other(format!(
                                "transcoder exited with {}",
                                status
                            )))))
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to reap transcoder");
                            Poll::Ready(None)
                        }
                    };
                }
                Stage::Finished => return Poll::Ready(None),
            }
        }
    }
}
