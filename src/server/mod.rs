use crate::archive::ArchiveStreamer;
use crate::config::Config;
use crate::delivery::{DeliveryEngine, FfmpegTranscoder};
use crate::metadata::{DetailsFetcher, TmdbClient};
use crate::store::NodeStore;
use crate::sync::{FfprobeProber, SyncLock, TreeSynchronizer};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use mediashelf_av::Toolchain;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod error;
pub mod routes_download;
pub mod routes_library;
pub mod routes_stream;
pub mod routes_subtitles;
pub mod routes_sync;
pub mod sse;

pub use error::{ApiResult, AppError};

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<NodeStore>,
    pub synchronizer: Arc<TreeSynchronizer>,
    /// Serializes sync runs
    pub sync_lock: SyncLock,
    pub delivery: Arc<DeliveryEngine>,
    pub archiver: Arc<ArchiveStreamer>,
    /// TMDB client, absent when no token is configured
    pub details: Option<Arc<dyn DetailsFetcher>>,
    pub tools: Toolchain,
}

impl AppContext {
    /// Build the production context: ffprobe/ffmpeg collaborators and a TMDB
    /// client when a token is available.
    pub fn from_config(config: Config) -> Result<Self> {
        let store = NodeStore::open(&config.storage.data_dir)
            .with_context(|| format!("Failed to open data dir {:?}", config.storage.data_dir))?;
        let tools = Toolchain::resolve(
            config.tools.ffmpeg_path.as_deref(),
            config.tools.ffprobe_path.as_deref(),
        );

        let synchronizer = TreeSynchronizer::new(
            Arc::new(FfprobeProber::new(tools.ffprobe.clone())),
            config.sync.concurrency,
        );
        let delivery = DeliveryEngine::new(
            config.delivery.max_transcodes,
            Arc::new(FfmpegTranscoder::new(tools.ffmpeg.clone())),
        );

        let details: Option<Arc<dyn DetailsFetcher>> = match config.tmdb.resolved_token() {
            Some(token) => Some(Arc::new(
                TmdbClient::new(token).context("Failed to create TMDB client")?,
            )),
            None => {
                tracing::warn!("No TMDB token configured, metadata updates are disabled");
                None
            }
        };

        Ok(Self::new(config, store, synchronizer, delivery, details, tools))
    }

    /// Assemble a context from explicit collaborators.
    pub fn new(
        config: Config,
        store: NodeStore,
        synchronizer: TreeSynchronizer,
        delivery: DeliveryEngine,
        details: Option<Arc<dyn DetailsFetcher>>,
        tools: Toolchain,
    ) -> Self {
        let archiver = ArchiveStreamer::new(store.temp_dir(), config.archive.compression_level);
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            synchronizer: Arc::new(synchronizer),
            sync_lock: SyncLock::default(),
            delivery: Arc::new(delivery),
            archiver: Arc::new(archiver),
            details,
            tools,
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::RANGE]);

    let images = ServeDir::new(ctx.store.images_dir());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .nest_service("/images", images)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn api_routes() -> Router<AppContext> {
    routes_library::library_routes()
        .merge(routes_sync::sync_routes())
        .merge(routes_subtitles::subtitle_routes())
        .merge(routes_download::download_routes())
        .merge(routes_stream::stream_routes())
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let ctx = AppContext::from_config(config)?;
    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
