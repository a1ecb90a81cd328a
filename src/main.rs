mod cli;

use mediashelf::{
    config, library,
    server::{self, AppContext},
    sync,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins when set
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediashelf=trace,mediashelf_av=trace,mediashelf_common=debug,tower_http=debug".to_string()
        } else {
            "mediashelf=debug,mediashelf_av=debug,mediashelf_common=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Sync { root } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(sync_once(root.as_deref(), cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediashelf {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn start_server(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting mediashelf server");
    tracing::info!(
        data_dir = %config.storage.data_dir.display(),
        max_transcodes = config.delivery.max_transcodes,
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    server::start_server(config).await
}

async fn sync_once(root: Option<&Path>, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let ctx = AppContext::from_config(config)?;

    if let Some(root) = root {
        let root = root.to_string_lossy();
        library::set_root_drive(&ctx.store, Some(&root))?;
    }

    let _guard = ctx.sync_lock.try_acquire()?;
    let print = |message: String| println!("{}", message);
    let summary = sync::sync_library(&ctx.store, &ctx.synchronizer, &print)
        .await
        .context("Sync failed")?;

    println!();
    println!("Sync Completed");
    println!("  Files: {}", summary.total_files);
    println!("  Top-level entries: {}", summary.root_children);
    println!("  Total size: {} bytes", summary.total_size);
    Ok(())
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = mediashelf_av::Toolchain::resolve(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    );
    let report = mediashelf_av::probe::probe(&tools.ffprobe, file).await?;

    if json {
        let subtitles: Vec<_> = report
            .subtitles
            .iter()
            .map(|s| {
                serde_json::json!({
                    "index": s.index,
                    "codec": s.codec,
                    "language": s.language,
                    "title": s.title,
                })
            })
            .collect();
        let value = serde_json::json!({
            "file": file,
            "duration": report.duration,
            "media_info": report.media_info(),
            "subtitles": subtitles,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    let secs = report.duration as u64;
    println!(
        "Duration: {:02}:{:02}:{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    );
    match &report.video {
        Some(video) => println!("Video: {} {}x{}", video.codec, video.width, video.height),
        None => println!("Video: none"),
    }

    println!("\nSubtitle Tracks: {}", report.subtitles.len());
    for (i, track) in report.subtitles.iter().enumerate() {
        print!("  [{}] stream {}", i, track.index);
        if let Some(ref codec) = track.codec {
            print!(" {}", codec);
        }
        if let Some(ref lang) = track.language {
            print!(" ({})", lang);
        }
        if let Some(ref title) = track.title {
            print!(" \"{}\"", title);
        }
        println!();
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let toolchain = mediashelf_av::Toolchain::resolve(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    );
    let tools = mediashelf_av::check_tools(&toolchain);
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Streaming of non-browser formats and subtitle extraction need ffmpeg and ffprobe.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Data dir: {}", config.storage.data_dir.display());
    println!("  Max transcodes: {}", config.delivery.max_transcodes);
    println!("  Compression level: {}", config.archive.compression_level);
    println!(
        "  TMDB token: {}",
        if config.tmdb.resolved_token().is_some() {
            "configured"
        } else {
            "missing"
        }
    );

    Ok(())
}
