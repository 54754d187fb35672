//! Monolith Binary - Single-server deployment
//!
//! Wires up:
//! - Local adapters (filesystem layout, JSON asset store, bounded queue)
//! - ffmpeg/ffprobe as the media toolchain
//! - Encode worker pool and the stuck-job reconciler
//! - HTTP inbound adapter

use chrono::Utc;
use hlsvault::adapters::local::access::StaticTokenGate;
use hlsvault::adapters::local::fs::MediaStore;
use hlsvault::adapters::local::http::{self, AppState};
use hlsvault::adapters::local::json_store::JsonFileRepository;
use hlsvault::adapters::local::queue::BoundedQueue;
use hlsvault::adapters::local::EventHub;
use hlsvault::application::ingest::IngestService;
use hlsvault::application::reconcile::Reconciler;
use hlsvault::application::streaming::StreamService;
use hlsvault::application::worker::WorkerService;
use hlsvault::av::cmd::FfmpegCli;
use hlsvault::av::encoder::HlsEncoder;
use hlsvault::ports::queue::JobQueuePort;
use hlsvault::Config;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn exit_with(message: &str, error: impl std::fmt::Display) -> ! {
    tracing::error!(error = %error, "{}", message);
    eprintln!("{}: {}", message, error);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hlsvault=info,monolith=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    let addr = config
        .socket_addr()
        .unwrap_or_else(|e| exit_with("Bad listen address", e));

    // 1. Adapters
    let store = MediaStore::new(&config.data_dir);
    if let Err(e) = store.ensure_dirs().await {
        exit_with("Could not create data directories", e);
    }
    let repo = match JsonFileRepository::open(&config.db_path).await {
        Ok(repo) => Arc::new(repo),
        Err(e) => exit_with("Could not open asset store", e),
    };
    let queue = Arc::new(BoundedQueue::new(config.max_queued_encodes));
    let events = Arc::new(EventHub::new());
    let toolchain = Arc::new(FfmpegCli::new(&config.ffmpeg_bin, &config.ffprobe_bin));
    let gate = Arc::new(StaticTokenGate::new(
        config.admin_tokens.clone(),
        config.subscriber_tokens.clone(),
    ));
    if config.admin_tokens.is_empty() {
        tracing::warn!("ADMIN_TOKENS is empty, uploads and edits are disabled");
    }

    // 2. Recover records a previous run left in flight
    let reconciler = Arc::new(Reconciler::new(
        repo.clone(),
        store.clone(),
        events.clone(),
        config.encode_timeout,
    ));
    match reconciler.recover(Utc::now()).await {
        Ok(failed) if !failed.is_empty() => {
            tracing::warn!(count = failed.len(), "Failed assets interrupted by the last shutdown")
        }
        Ok(_) => {}
        Err(e) => exit_with("Startup reconcile failed", e),
    }
    reconciler.clone().spawn_periodic(config.reconcile_interval);

    // 3. Application services and workers
    let worker = Arc::new(WorkerService::new(
        repo.clone(),
        queue.clone(),
        HlsEncoder::new(toolchain.clone(), config.hls_segment_seconds),
        store.clone(),
        events.clone(),
        config.encode_timeout,
        config.max_encode_attempts,
    ));
    let workers = worker.start(config.max_concurrent_encodes);

    let ingest = Arc::new(IngestService::new(
        repo.clone(),
        queue.clone(),
        toolchain,
        store.clone(),
        events.clone(),
        config.thumbnail_offset_secs,
    ));
    let streams = Arc::new(StreamService::new(repo, store));

    // 4. HTTP layer
    let app = http::router(AppState {
        ingest,
        streams,
        events,
        gate,
        max_upload_bytes: config.max_upload_bytes,
        client_url: config.client_url.clone(),
    });

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => exit_with("Failed to bind TCP listener", e),
    };
    tracing::info!(%addr, data_dir = %config.data_dir.display(), "Listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await;

    // In-flight encodes are killed with their workers; the next startup fails those records
    queue.close();
    for handle in workers {
        handle.abort();
    }
    if let Err(e) = served {
        exit_with("Server error", e);
    }
}
