//! Live H.264/AAC fragmented-MP4 transcoding to stdout.

use crate::{Error, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Build the ffmpeg argument list for a transcode starting at `start` seconds.
pub fn transcode_args(input: &Path, start: f64) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        format_seconds(start).into(),
        "-i".into(),
        input.as_os_str().to_owned(),
    ];
    args.extend(
        [
            "-c:v",
            "libx264",
            "-c:a",
            "aac",
            "-f",
            "mp4",
            "-movflags",
            "frag_keyframe+empty_moov",
            "-preset",
            "ultrafast",
            "-tune",
            "zerolatency",
            "-crf",
            "28",
            "-max_muxing_queue_size",
            "1024",
            "pipe:1",
        ]
        .into_iter()
        .map(OsString::from),
    );
    args
}

fn format_seconds(seconds: f64) -> String {
    if seconds.fract() == 0.0 {
        format!("{}", seconds as u64)
    } else {
        format!("{:.3}", seconds)
    }
}

/// Spawn ffmpeg with stdout and stderr piped.
///
/// The child is killed when dropped, so dropping whatever owns it (the
/// response body) stops the transcode. With `-loglevel error`, anything on
/// stderr is a failure report.
pub fn spawn_transcode(ffmpeg: &Path, input: &Path, start: f64) -> Result<Child> {
    tracing::debug!(input = %input.display(), start, "Spawning transcode");

    Command::new(ffmpeg)
        .args(transcode_args(input, start))
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
