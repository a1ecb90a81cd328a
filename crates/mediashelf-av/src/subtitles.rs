//! Embedded subtitle extraction to SRT files.
//!
//! All requested streams are written by a single ffmpeg run. Progress is read
//! from `-progress pipe:1`, which prints `key=value` lines on stdout.

use crate::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// One stream to extract and where to write it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractTrack {
    /// Container-level stream index (the `N` in `-map 0:N`).
    pub stream_index: u32,
    pub output: PathBuf,
}

/// Build the ffmpeg argument list for extracting `tracks` from `input`.
pub fn extract_args(input: &Path, tracks: &[ExtractTrack]) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-nostats", "-progress", "pipe:1", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(input.as_os_str().to_owned());

    for track in tracks {
        args.push("-map".into());
        args.push(format!("0:{}", track.stream_index).into());
        args.push(track.output.as_os_str().to_owned());
    }
    args
}

/// Spawn the extraction with stdout piped for progress lines.
pub fn spawn_extract(ffmpeg: &Path, input: &Path, tracks: &[ExtractTrack]) -> Result<Child> {
    Command::new(ffmpeg)
        .args(extract_args(input, tracks))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::tool_not_found("ffmpeg")
            } else {
                Error::Io(e)
            }
        })
}

/// Extract the processed position in seconds from one progress line.
///
/// ffmpeg reports `out_time_ms` in microseconds despite the name; `out_time`
/// is `HH:MM:SS.micro`.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_ms" | "out_time_us" => value
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .map(|v| v as f64 / 1_000_000.0),
        "out_time" => parse_timemark(value),
        _ => None,
    }
}

/// Parse `HH:MM:SS(.fraction)` into seconds.
pub fn parse_timemark(timemark: &str) -> Option<f64> {
    let mut parts = timemark.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Percent of `duration` reached at `position`, capped at 99 until the run ends.
pub fn progress_percent(position: f64, duration: f64) -> u8 {
    if duration <= 0.0 {
        return 0;
    }
    ((position / duration) * 100.0).round().clamp(0.0, 99.0) as u8
}

/// Strip a language tag down to ASCII alphanumerics.
///
/// ```
/// use mediashelf_av::subtitles::sanitize_language;
///
/// assert_eq!(sanitize_language("pt-BR"), "ptBR");
/// assert_eq!(sanitize_language("../"), "");
/// ```
pub fn sanitize_language(language: &str) -> String {
    language.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// File name for the `n`th extracted subtitle track of a node.
pub fn subtitle_file_name(node_id: &str, n: usize, language: &str) -> String {
    format!("{}_track{}_{}.srt", node_id, n, sanitize_language(language))
}

/// Recover `(track, language)` from a name produced by [`subtitle_file_name`].
pub fn parse_subtitle_file_name(file_name: &str) -> Option<(String, String)> {
    let stem = file_name.strip_suffix(".srt")?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 3 {
        return None;
    }
    let language = parts[parts.len() - 1].to_string();
    let track = parts[parts.len() - 2].strip_prefix("track")?.to_string();
    Some((track, language))
}
