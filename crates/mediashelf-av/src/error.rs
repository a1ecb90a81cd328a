//! Error types for mediashelf-av.

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving ffprobe/ffmpeg.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// An external tool failed to execute.
    #[error("tool execution failed: {tool}: {message}")]
    ToolFailed { tool: String, message: String },

    /// Failed to parse tool output.
    #[error("failed to parse {tool} output: {message}")]
    ParseError { tool: String, message: String },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a tool execution failed error.
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse_error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseError {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Name of the tool involved, if the error came from one.
    pub fn tool(&self) -> Option<&str> {
        match self {
            Error::ToolNotFound { tool }
            | Error::ToolFailed { tool, .. }
            | Error::ParseError { tool, .. } => Some(tool),
            Error::Io(_) | Error::Json(_) => None,
        }
    }
}

impl From<Error> for mediashelf_common::Error {
    fn from(err: Error) -> Self {
        let tool = err.tool().unwrap_or("ffmpeg").to_string();
        mediashelf_common::Error::subprocess(tool, err.to_string())
    }
}
