//! FFprobe-based media probing.

use crate::{Error, Result};
use mediashelf_common::MediaInfo;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
    title: Option<String>,
}

/// The first video stream of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStream {
    pub codec: String,
    pub width: u32,
    pub height: u32,
}

/// A subtitle stream, addressed by its container-level index.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleStream {
    pub index: u32,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
}

/// What ffprobe reported about a file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    /// Container duration in seconds, 0 when unknown.
    pub duration: f64,
    pub video: Option<VideoStream>,
    pub subtitles: Vec<SubtitleStream>,
}

impl ProbeReport {
    /// Media info for the library tree, or `None` when there is no video stream.
    pub fn media_info(&self) -> Option<MediaInfo> {
        self.video.as_ref().map(|video| MediaInfo {
            duration: self.duration,
            codec: video.codec.clone(),
            width: video.width,
            height: video.height,
        })
    }
}

/// Map ffprobe codec names to display names.
///
/// ```
/// use mediashelf_av::probe::normalize_codec;
///
/// assert_eq!(normalize_codec("hevc"), "H.265");
/// assert_eq!(normalize_codec("h264"), "H.264");
/// assert_eq!(normalize_codec("vp9"), "vp9");
/// ```
pub fn normalize_codec(codec: &str) -> String {
    match codec {
        "hevc" => "H.265".to_string(),
        "h264" => "H.264".to_string(),
        other => other.to_string(),
    }
}

/// Probe a media file using the given ffprobe executable.
pub async fn probe(ffprobe: &Path, path: &Path) -> Result<ProbeReport> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::tool_not_found("ffprobe")
            } else {
                Error::Io(e)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::tool_failed(
            "ffprobe",
            format!("{} ({})", stderr.trim(), output.status),
        ));
    }

    let json_str = String::from_utf8(output.stdout)
        .map_err(|e| Error::parse_error("ffprobe", format!("Invalid UTF-8: {}", e)))?;

    parse_ffprobe_json(&json_str)
}

/// Parse ffprobe's `-print_format json -show_format -show_streams` output.
pub fn parse_ffprobe_json(json: &str) -> Result<ProbeReport> {
    let output: FfprobeOutput = serde_json::from_str(json)?;

    let duration = output
        .format
        .duration
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let mut report = ProbeReport {
        duration,
        video: None,
        subtitles: Vec::new(),
    };

    for stream in output.streams {
        match stream.codec_type.as_deref() {
            Some("video") if report.video.is_none() => {
                report.video = Some(VideoStream {
                    codec: normalize_codec(stream.codec_name.as_deref().unwrap_or("unknown")),
                    width: stream.width.unwrap_or(0),
                    height: stream.height.unwrap_or(0),
                });
            }
            Some("subtitle") => report.subtitles.push(SubtitleStream {
                index: stream.index,
                codec: stream.codec_name,
                language: stream.tags.language,
                title: stream.tags.title,
            }),
            _ => {}
        }
    }

    Ok(report)
}
