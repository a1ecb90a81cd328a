//! External tool detection and management.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Check a tool at an explicit location.
///
/// ffmpeg-family tools take `-version`, not `--version`.
///
/// ```no_run
/// use mediashelf_av::tools::check_tool_at;
/// use std::path::Path;
///
/// let info = check_tool_at("ffprobe", Path::new("/usr/bin/ffprobe"));
/// if info.available {
///     println!("ffprobe version: {:?}", info.version);
/// }
/// ```
pub fn check_tool_at(name: &str, executable: &Path) -> ToolInfo {
    match Command::new(executable).arg("-version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string());

            ToolInfo {
                name: name.to_string(),
                available: true,
                version,
                path: which::which(executable).ok(),
            }
        }
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Check the tools mediashelf shells out to.
pub fn check_tools(toolchain: &Toolchain) -> Vec<ToolInfo> {
    vec![
        check_tool_at("ffmpeg", &toolchain.ffmpeg),
        check_tool_at("ffprobe", &toolchain.ffprobe),
    ]
}

/// Locate `name` on PATH.
fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::tool_not_found(name))
}

/// Get the path to a tool, preferring a configured path over PATH lookup.
fn get_tool_path(name: &str, config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    require_tool(name)
}

/// Resolved executables for ffmpeg and ffprobe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl Toolchain {
    /// Resolve from configured paths, then PATH.
    ///
    /// A tool that cannot be found keeps its bare name so the failure surfaces
    /// when it is first spawned rather than at startup.
    pub fn resolve(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Self {
        let resolve_one = |name: &str, configured: Option<&Path>| {
            get_tool_path(name, configured).unwrap_or_else(|err| {
                tracing::warn!(tool = name, error = %err, "Tool not resolved, relying on PATH at spawn time");
                configured.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(name))
            })
        };

        Self {
            ffmpeg: resolve_one("ffmpeg", ffmpeg),
            ffprobe: resolve_one("ffprobe", ffprobe),
        }
    }
}
