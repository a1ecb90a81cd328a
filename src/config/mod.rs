mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config.toml",
        "./mediashelf.toml",
        "~/.config/mediashelf/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.delivery.max_transcodes == 0 {
        anyhow::bail!("delivery.max_transcodes must be at least 1");
    }

    if config.archive.compression_level > 9 {
        anyhow::bail!(
            "archive.compression_level must be between 0 and 9, got {}",
            config.archive.compression_level
        );
    }

    if config.sync.concurrency == 0 {
        anyhow::bail!("sync.concurrency must be at least 1");
    }

    for (name, path) in [
        ("ffmpeg", &config.tools.ffmpeg_path),
        ("ffprobe", &config.tools.ffprobe_path),
    ] {
        if let Some(path) = path {
            if !path.exists() {
                tracing::warn!("Configured {} path does not exist: {:?}", name, path);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.data_dir, std::path::PathBuf::from("./data"));
        assert_eq!(config.delivery.max_transcodes, 3);
        assert_eq!(config.archive.compression_level, 5);
        assert_eq!(config.sync.concurrency, 8);
        assert!(config.tmdb.access_token.is_none());
    }

    #[test]
    fn test_parse_sections() {
        let config = parse_config(
            r#"
            [server]
            port = 8088

            [storage]
            data_dir = "/var/lib/mediashelf"

            [delivery]
            max_transcodes = 1

            [tools]
            ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"

            [tmdb]
            access_token = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.delivery.max_transcodes, 1);
        assert_eq!(
            config.tools.ffmpeg_path.as_deref(),
            Some(Path::new("/opt/ffmpeg/bin/ffmpeg"))
        );
        assert_eq!(config.tmdb.access_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(parse_config("[server]\nport = 0").is_err());
        assert!(parse_config("[delivery]\nmax_transcodes = 0").is_err());
        assert!(parse_config("[archive]\ncompression_level = 10").is_err());
        assert!(parse_config("[sync]\nconcurrency = 0").is_err());
    }

    #[test]
    fn test_load_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }
}
