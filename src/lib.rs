//! Mediashelf - media library indexer and streaming server
//!
//! This library crate exposes the core functionality for integration testing.

pub mod archive;
pub mod config;
pub mod delivery;
pub mod library;
pub mod metadata;
pub mod progress;
pub mod server;
pub mod store;
pub mod subtitles;
pub mod sync;
