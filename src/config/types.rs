use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that overrides `[tmdb] access_token`.
pub const TMDB_TOKEN_ENV: &str = "TMDB_ACCESS_TOKEN";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub tmdb: TmdbConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Holds files.json, config.json, images/, temp/ and uploads/.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    /// Maximum simultaneously running transcodes.
    #[serde(default = "default_max_transcodes")]
    pub max_transcodes: usize,
}

fn default_max_transcodes() -> usize {
    3
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_transcodes: default_max_transcodes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    /// Deflate level (0-9) for progress-reporting archives.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

fn default_compression_level() -> u32 {
    5
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Sibling entries stat'd and probed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    8
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TmdbConfig {
    #[serde(default)]
    pub access_token: Option<String>,
}

impl TmdbConfig {
    /// The token to use: environment first, then the config file.
    pub fn resolved_token(&self) -> Option<String> {
        std::env::var(TMDB_TOKEN_ENV)
            .ok()
            .or_else(|| self.access_token.clone())
            .filter(|t| !t.trim().is_empty())
    }
}
