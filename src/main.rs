//! wyoming-webhook-stt: Wyoming protocol STT server backed by an HTTP webhook
//!
//! Listens for Wyoming ASR clients on TCP, buffers streamed audio per
//! connection, and on stream end relays the finished utterance to a
//! transcription webhook as a WAV upload, answering with the returned text.

mod config;
mod lifecycle;
mod session;
mod transcribe;
mod wyoming;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::lifecycle::ShutdownSignal;
use crate::transcribe::WebhookTranscriber;
use crate::wyoming::Server;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "wyoming-webhook-stt starting"
    );

    // Load configuration
    let config = Config::load();
    if config.is_placeholder() {
        warn!(
            var = config::WEBHOOK_URL_ENV,
            "webhook URL is not configured; transcriptions will fail until it is set"
        );
    }
    info!(webhook_url = %config.webhook_url, "configuration loaded");

    let mut shutdown = ShutdownSignal::new()?;

    let transcriber = Arc::new(WebhookTranscriber::new(config.webhook_url.clone())?);
    let server = Server::bind(&config.listen_addr(), transcriber).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "server error");
            }
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("wyoming-webhook-stt stopped");

    Ok(())
}
