use std::sync::Arc;

use media_relay::{
    config::AppConfig,
    error::ApiError,
    ffmpeg::Ffmpeg,
    handlers::{self, AppState},
    pipeline::FetchAndMerge,
    store::ArtifactStore,
    sweeper::RetentionSweeper,
    ytdlp::{Extractor, YtDlp},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "media_relay=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = AppConfig::from_env();

    let store = ArtifactStore::open(&config.storage_dir).await?;
    info!("Artifact store at {:?}", store.root());

    if config.collaborator_timeout.is_none() {
        warn!("COLLABORATOR_TIMEOUT_SECONDS not set: extractor and muxer calls are unbounded.");
    }

    let extractor: Arc<dyn Extractor> = Arc::new(YtDlp::new(
        config.yt_dlp_bin.clone(),
        config.collaborator_timeout,
    ));
    let muxer = Arc::new(Ffmpeg::new(
        config.ffmpeg_bin.clone(),
        config.collaborator_timeout,
    ));
    let pipeline = FetchAndMerge::new(extractor.clone(), muxer, store.clone());

    let shutdown = CancellationToken::new();
    let sweeper = RetentionSweeper::new(store.clone(), config.retention, config.sweep_interval)
        .spawn(shutdown.clone());

    let cors = config.cors_layer()?;
    let app = handlers::router(AppState {
        extractor,
        pipeline,
        store,
    })
    .layer(cors);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;

    info!("Media relay listening on http://{}", config.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")));

    shutdown.cancel();
    if let Err(error) = sweeper.await {
        warn!("Retention sweeper ended abnormally: {error}");
    }

    served
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!("Could not listen for SIGTERM: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }

    info!("Shutting down");
    shutdown.cancel();
}
