//! Path utilities for detecting file types by extension.
//!
//! The synchronizer probes video containers, the delivery engine serves
//! browser-playable containers directly and transcodes everything else.

use std::path::Path;

/// Video containers the synchronizer probes for technical info.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "webm", "m4v"];

/// Containers browsers play natively; these are served as raw byte ranges.
const BROWSER_PLAYABLE_EXTENSIONS: &[&str] = &["mp4", "webm", "ogg", "m4v"];

/// List of supported subtitle file extensions.
const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "sub", "vtt"];

/// Lowercased extension of a path, if any.
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

fn has_extension_in(path: &Path, list: &[&str]) -> bool {
    extension(path)
        .map(|ext| list.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check if a path has a video file extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use mediashelf_common::paths::is_video_file;
///
/// assert!(is_video_file(Path::new("movie.mkv")));
/// assert!(is_video_file(Path::new("/path/to/video.MP4")));
/// assert!(!is_video_file(Path::new("subtitle.srt")));
/// ```
pub fn is_video_file(path: &Path) -> bool {
    has_extension_in(path, VIDEO_EXTENSIONS)
}

/// Check if a path can be served to a browser without transcoding.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use mediashelf_common::paths::is_browser_playable;
///
/// assert!(is_browser_playable(Path::new("clip.webm")));
/// assert!(!is_browser_playable(Path::new("movie.mkv")));
/// ```
pub fn is_browser_playable(path: &Path) -> bool {
    has_extension_in(path, BROWSER_PLAYABLE_EXTENSIONS)
}

/// Check if a path has a subtitle file extension.
pub fn is_subtitle_file(path: &Path) -> bool {
    has_extension_in(path, SUBTITLE_EXTENSIONS)
}

/// Determine content type from a file's extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match extension(path).as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("ogg") => "video/ogg",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("srt") => "application/x-subrip",
        Some("vtt") => "text/vtt",
        Some("zip") => "application/zip",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Get the list of video file extensions.
#[must_use]
pub fn video_extensions() -> &'static [&'static str] {
    VIDEO_EXTENSIONS
}
