//! # mediashelf-av
//!
//! Thin async wrappers around the ffprobe and ffmpeg command-line tools.
//!
//! - [`probe`]: duration, first video stream and subtitle streams of a file
//! - [`transcode`]: live fragmented-MP4 transcode piped to stdout
//! - [`subtitles`]: one-shot extraction of embedded subtitle streams to SRT
//! - [`tools`]: locating the executables
//!
//! ## Example
//!
//! ```no_run
//! use mediashelf_av::{probe, Toolchain};
//! use std::path::Path;
//!
//! # async fn run() -> mediashelf_av::Result<()> {
//! let tools = Toolchain::resolve(None, None);
//! let report = probe::probe(&tools.ffprobe, Path::new("/media/movie.mkv")).await?;
//! println!("{:?}", report.media_info());
//! # Ok(())
//! # }
//! ```

mod error;
pub mod probe;
pub mod subtitles;
pub mod tools;
pub mod transcode;

pub use error::{Error, Result};
pub use probe::{ProbeReport, SubtitleStream, VideoStream};
pub use tools::{check_tools, ToolInfo, Toolchain};
