//! Media delivery: raw byte ranges for browser-playable files, live
//! transcodes for everything else.
//!
//! Transcodes are capped per engine by a semaphore. A request beyond the cap
//! is rejected immediately with [`Error::CapacityExceeded`]; nothing queues.

mod range;
mod transcode;

pub use range::{resolve_range, RangeSpec};
pub use transcode::{FfmpegTranscoder, TranscodeStream, Transcoder};

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use mediashelf_common::paths::{content_type_for, is_browser_playable};
use mediashelf_common::{find_by_id, Error, Node, NodeId, Result};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;

/// What to send back for a stream request.
pub enum Delivery {
    /// Bytes straight from disk. `file` is already positioned at the range start.
    Raw {
        file: File,
        range: RangeSpec,
        total: u64,
        content_type: &'static str,
    },
    /// The requested range lies outside the file.
    Unsatisfiable { total: u64 },
    /// Output of a running transcode.
    Transcode(TranscodeStream),
}

pub struct DeliveryEngine {
    permits: Arc<Semaphore>,
    limit: usize,
    transcoder: Arc<dyn Transcoder>,
}

impl DeliveryEngine {
    pub fn new(limit: usize, transcoder: Arc<dyn Transcoder>) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            transcoder,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of transcodes currently holding a permit.
    pub fn active_transcodes(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Resolve a stream request for `id` against `tree`.
    pub async fn serve(
        &self,
        tree: &[Node],
        id: NodeId,
        range_header: Option<&str>,
        start: f64,
    ) -> Result<Delivery> {
        let node = find_by_id(tree, id)
            .filter(|n| n.is_file())
            .ok_or_else(|| Error::not_found("file", id))?;

        if is_browser_playable(&node.path) {
            self.serve_raw(node, range_header).await
        } else {
            self.serve_transcode(node, start)
        }
    }

    async fn serve_raw(&self, node: &Node, range_header: Option<&str>) -> Result<Delivery> {
        let total = tokio::fs::metadata(&node.path)
            .await
            .map_err(|e| Error::source_unreadable(&node.path, e))?
            .len();

        let range = resolve_range(range_header, total);
        if range == RangeSpec::Unsatisfiable {
            return Ok(Delivery::Unsatisfiable { total });
        }

        let mut file = File::open(&node.path)
            .await
            .map_err(|e| Error::source_unreadable(&node.path, e))?;
        if let RangeSpec::Partial { start, .. } = range {
            file.seek(SeekFrom::Start(start)).await?;
        }

        Ok(Delivery::Raw {
            file,
            range,
            total,
            content_type: content_type_for(&node.path),
        })
    }

    fn serve_transcode(&self, node: &Node, start: f64) -> Result<Delivery> {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::CapacityExceeded { limit: self.limit })?;

        let child = self.transcoder.spawn(&node.path, start)?;
        tracing::info!(
            node = %node.id,
            path = %node.path.display(),
            start,
            active = self.active_transcodes(),
            "Transcode started"
        );
        Ok(Delivery::Transcode(TranscodeStream::new(child, permit)?))
    }
}

/// Parse the `start` query value; anything but a finite non-negative number is 0.
pub fn parse_start_offset(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0)
}

impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        let builder = Response::builder();
        let built = match self {
            Delivery::Raw {
                file,
                range,
                total,
                content_type,
            } => {
                let length = range.len(total);
                let builder = builder
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::CONTENT_LENGTH, length.to_string())
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CONTENT_DISPOSITION, "inline");
                let body = Body::from_stream(ReaderStream::new(file.take(length)));
                match range {
                    RangeSpec::Partial { start, end } => builder
                        .status(StatusCode::PARTIAL_CONTENT)
                        .header(
                            header::CONTENT_RANGE,
                            format!("bytes {}-{}/{}", start, end, total),
                        )
                        .body(body),
                    _ => builder.status(StatusCode::OK).body(body),
                }
            }
            Delivery::Unsatisfiable { total } => builder
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{}", total))
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::empty()),
            Delivery::Transcode(stream) => builder
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "video/mp4")
                .header(header::CONTENT_DISPOSITION, "inline")
                .body(Body::from_stream(stream)),
        };

        built.unwrap_or_else(|e| {
            tracing::error!("Failed to build delivery response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
    }
}
