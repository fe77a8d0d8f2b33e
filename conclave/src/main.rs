use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use conclave_api::{create_router, ApiState};
use conclave_core::bus::InMemoryBus;
use conclave_core::media::loopback::LoopbackMediaPlane;
use conclave_core::media::MediaPlane;
use conclave_core::{logging, Config, SfuState};
use conclave_transcribe::{MinutesGenerator, TranscriberRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_file = std::env::args().nth(1);
    let config = Config::load(config_file.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}");
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize logging
    logging::init_logging(&config.logging)?;

    info!("Conclave SFU control plane starting...");
    info!("Bind address: {}", config.server.bind);
    if config.server.secret.is_empty() {
        warn!("No operator secret configured; the operator surface is disabled");
    }
    if !config.transcription_enabled() {
        info!("ASR URL not configured; transcription is disabled");
    }
    if !config.remote_summarizer_enabled() {
        info!("Summarizer token not configured; minutes use the local summarizer");
    }

    // The in-process media plane stands in for the external RTP engine; a
    // production deployment binds the real engine behind the same trait.
    let media: Arc<dyn MediaPlane> = Arc::new(LoopbackMediaPlane::new());
    let bus = Arc::new(InMemoryBus::new());

    let sfu = SfuState::new(config, bus, Arc::clone(&media));
    Arc::clone(&sfu).spawn_background_tasks();
    info!("State container initialized");

    let transcribers = TranscriberRegistry::new(sfu.config.asr.clone(), media);
    let media_watch = Arc::clone(&transcribers).spawn_media_watch();
    info!("Transcriber registry initialized");

    let minutes = MinutesGenerator::new(&sfu.config.summarizer);
    info!("Minutes generator initialized");

    let state = ApiState {
        sfu: Arc::clone(&sfu),
        transcribers,
        minutes,
    };
    let router = create_router(state);

    let bind = sfu.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind).await.map_err(|e| {
        error!("Failed to bind {bind}: {e}");
        anyhow::anyhow!("Bind failed: {e}")
    })?;
    info!("HTTP server listening on {bind}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    media_watch.abort();
    sfu.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
}
