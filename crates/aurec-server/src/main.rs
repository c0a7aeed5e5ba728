use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use tracing_subscriber::EnvFilter;

use aurec_server::config::{Config, LogFormat};
use aurec_server::flash::FlashFs;
use aurec_server::peripheral::SimulatedPeripheral;
use aurec_server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let flash = FlashFs::with_max_path_len(
        &config.storage_root,
        config.storage_capacity,
        config.max_path_len,
    );
    let peripheral = Arc::new(SimulatedPeripheral::new(config.realtime));
    let cors_origin =
        HeaderValue::from_str(&config.cors_origin).context("invalid cors origin header")?;

    let state = AppState::new(flash, peripheral)
        .with_upload_slots(config.upload_slots)
        .with_capture(config.capture.clone())
        .with_playback(config.playback.clone())
        .with_recording_path(config.recording_path.clone())
        .with_cors_allow_origin(cors_origin)
        .with_max_request_bytes(config.max_request_bytes);

    let server = aurec_server::start(state, config.listen_addr).await?;
    tracing::info!(
        "aurec-server listening on http://{} (storage: {}, capacity: {} bytes)",
        server.addr(),
        config.storage_root.display(),
        config.storage_capacity
    );

    shutdown_signal().await;
    tracing::info!("shutting down");
    server.shutdown().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
