//! Subtitle extraction, discovery and attachment.

use futures::Stream;
use mediashelf_av::subtitles::{
    parse_progress_line, parse_subtitle_file_name, progress_percent, spawn_extract,
    subtitle_file_name, ExtractTrack,
};
use mediashelf_av::Toolchain;
use mediashelf_common::paths::is_subtitle_file;
use mediashelf_common::{find_by_id_mut, Error, Node, NodeId, Result, Subtitle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{info, warn};

use crate::progress::ProgressEvent;
use crate::store::NodeStore;

/// A subtitle written by an extraction run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedSubtitle {
    pub label: String,
    pub language: String,
    pub path: PathBuf,
    pub is_embedded: bool,
}

/// An extracted subtitle waiting in the temp directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TempSubtitle {
    pub filename: String,
    pub extracted_path: PathBuf,
    pub label: String,
    pub language: String,
}

/// Extract every embedded subtitle stream of `node` into `temp_dir`.
///
/// The stream always ends with one `done` or `error` event.
pub fn extract_embedded(
    tools: Toolchain,
    node: Node,
    temp_dir: PathBuf,
) -> impl Stream<Item = ProgressEvent> + Send {
    async_stream::stream! {
        yield ProgressEvent::start("Analyzing file...");

        let report = match mediashelf_av::probe::probe(&tools.ffprobe, &node.path).await {
            Ok(report) => report,
            Err(e) => {
                warn!(path = %node.path.display(), error = %e, "Subtitle probe failed");
                yield ProgressEvent::error("FFprobe failed");
                return;
            }
        };

        if report.subtitles.is_empty() {
            yield ProgressEvent::done("No subtitles found")
                .with("extracted", Vec::<ExtractedSubtitle>::new());
            return;
        }

        let mut tracks = Vec::new();
        let mut extracted = Vec::new();
        for (n, stream) in report.subtitles.iter().enumerate() {
            let language = stream.language.clone().unwrap_or_else(|| "und".to_string());
            let title = stream.title.clone().unwrap_or_else(|| format!("Track {}", n));
            let output = temp_dir.join(subtitle_file_name(&node.id.to_string(), n, &language));

            tracks.push(ExtractTrack {
                stream_index: stream.index,
                output: output.clone(),
            });
            extracted.push(ExtractedSubtitle {
                label: format!("Embedded {} - {}", language.to_uppercase(), title),
                language,
                path: output,
                is_embedded: true,
            });
        }

        let mut child = match spawn_extract(&tools.ffmpeg, &node.path, &tracks) {
            Ok(child) => child,
            Err(e) => {
                yield ProgressEvent::error(e.to_string());
                return;
            }
        };

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            let mut last_percent = None;
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(position) = parse_progress_line(&line) else {
                    continue;
                };
                let percent = progress_percent(position, report.duration);
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    yield ProgressEvent::percent(percent);
                }
            }
        }

        let status = child.wait().await;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        match status {
            Ok(status) if status.success() => {
                info!(node = %node.id, tracks = extracted.len(), "Subtitles extracted");
                yield ProgressEvent::done("Subtitles extracted")
                    .with_percent(100)
                    .with("extracted", &extracted);
            }
            Ok(status) => {
                let message = stderr.lines().last().unwrap_or("").trim().to_string();
                warn!(node = %node.id, %status, %message, "Subtitle extraction failed");
                yield ProgressEvent::error(if message.is_empty() {
                    format!("ffmpeg exited with {}", status)
                } else {
                    message
                });
            }
            Err(e) => yield ProgressEvent::error(e.to_string()),
        }
    }
}

/// List extracted subtitles for `id` waiting in `temp_dir`.
pub async fn list_temp(temp_dir: &Path, id: NodeId) -> Result<Vec<TempSubtitle>> {
    let mut reader = match tokio::fs::read_dir(temp_dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::source_unreadable(temp_dir, e)),
    };

    let prefix = id.to_string();
    let mut found = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let filename = entry.file_name().to_string_lossy().into_owned();
        if !filename.starts_with(&prefix) || !filename.ends_with(".srt") {
            continue;
        }

        let (track, language) = parse_subtitle_file_name(&filename)
            .unwrap_or_else(|| ("?".to_string(), "unknown".to_string()));
        found.push(TempSubtitle {
            extracted_path: entry.path(),
            label: format!("Extracted Track {} ({})", track, language),
            language,
            filename,
        });
    }

    found.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(found)
}

/// Store an uploaded subtitle under `uploads_dir`.
pub async fn save_upload(uploads_dir: &Path, original_name: &str, data: &[u8]) -> Result<PathBuf> {
    let safe: String = Path::new(original_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    if !is_subtitle_file(Path::new(&safe)) {
        return Err(Error::invalid_input(format!(
            "Unsupported subtitle file: {}",
            original_name
        )));
    }

    let path = uploads_dir.join(format!("{}_{}", uuid::Uuid::new_v4(), safe));
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

/// Append `subtitle` to node `id` and persist the tree.
pub fn attach(store: &NodeStore, id: NodeId, subtitle: Subtitle) -> Result<Node> {
    if !subtitle.path.is_file() {
        return Err(Error::invalid_input(format!(
            "Subtitle file does not exist: {}",
            subtitle.path.display()
        )));
    }

    store.update_tree(|tree| {
        let node = find_by_id_mut(tree, id).ok_or_else(|| Error::not_found("node", id))?;
        node.subtitles.push(subtitle);
        Ok(node.clone())
    })
}
