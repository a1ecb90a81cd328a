//! Unified error type for mediashelf.
//!
//! Library-level failures funnel into [`Error`], which carries enough context
//! for the HTTP layer to derive a status code via [`Error::http_status`].

use std::fmt;
use std::path::PathBuf;

/// Common error type for mediashelf.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown id, or a node of the wrong kind for the operation.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "node", "directory").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation conflicts with one already in flight.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The library root or a file could not be read.
    #[error("Source unreadable: {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external process (ffprobe, ffmpeg) failed or crashed.
    #[error("Subprocess error [{tool}]: {message}")]
    Subprocess { tool: String, message: String },

    /// The metadata provider failed, or is not configured.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The transcode cap is reached.
    #[error("Too many active streams (limit {limit})")]
    CapacityExceeded { limit: usize },

    /// Reading or writing a persisted document failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::InvalidInput(_) => 400,
            Error::Conflict(_) => 409,
            Error::SourceUnreadable { .. } => 500,
            Error::Subprocess { .. } => 502,
            Error::Upstream(_) => 502,
            Error::CapacityExceeded { .. } => 503,
            Error::Persistence(_) => 500,
            Error::Io(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Conflict(_) => "conflict",
            Error::SourceUnreadable { .. } => "source_unreadable",
            Error::Subprocess { .. } => "subprocess_failure",
            Error::Upstream(_) => "upstream_failure",
            Error::CapacityExceeded { .. } => "capacity_exceeded",
            Error::Persistence(_) => "persistence_failure",
            Error::Io(_) => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Create a new NotFound error.
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new SourceUnreadable error.
    pub fn source_unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            source,
        }
    }

    /// Create a new Subprocess error.
    pub fn subprocess(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subprocess {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new Upstream error.
    pub fn upstream<S: Into<String>>(msg: S) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create a new Persistence error.
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("node", "abc-123");
        assert_eq!(err.to_string(), "node not found: abc-123");

        let err = Error::CapacityExceeded { limit: 3 };
        assert_eq!(err.to_string(), "Too many active streams (limit 3)");

        let err = Error::subprocess("ffmpeg", "exit status 1");
        assert_eq!(err.to_string(), "Subprocess error [ffmpeg]: exit status 1");
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(Error::not_found("node", "x").http_status(), 404);
        assert_eq!(Error::invalid_input("bad").http_status(), 400);
        assert_eq!(Error::Conflict("busy".into()).http_status(), 409);
        assert_eq!(Error::CapacityExceeded { limit: 1 }.http_status(), 503);
        assert_eq!(Error::upstream("tmdb down").http_status(), 502);
        assert_eq!(Error::persistence("disk").http_status(), 500);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.code(), "io_error");
    }

    #[test]
    fn test_source_unreadable_keeps_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::source_unreadable("/media/root", io_err);
        assert!(err.to_string().contains("/media/root"));
        assert_eq!(err.code(), "source_unreadable");
    }
}
