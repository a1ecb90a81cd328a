//! Mediashelf-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across mediashelf:
//!
//! - **Typed IDs**: the [`NodeId`] UUID wrapper addressing library nodes
//! - **Node model**: files, directories and their cached metadata
//! - **Path Utilities**: Functions to detect file types by extension
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use mediashelf_common::{NodeId, Error, Result};
//! use mediashelf_common::paths::is_video_file;
//! use std::path::Path;
//!
//! let id = NodeId::new();
//! assert!(is_video_file(Path::new("movie.mkv")));
//!
//! fn example(id: NodeId) -> Result<()> {
//!     Err(Error::not_found("node", id))
//! }
//! # assert!(example(id).is_err());
//! ```

pub mod error;
pub mod ids;
pub mod node;
pub mod paths;

pub use error::{Error, Result};
pub use ids::NodeId;
pub use node::*;
