//! Transcription submission to the HTTP webhook
//!
//! Packages buffered PCM audio as a WAV file in a uniquely-named temporary
//! location, uploads it to the configured webhook as a multipart form, and
//! extracts the transcript text from the JSON response. Every failure mode
//! collapses to `None` for the caller; detail goes to the log. The temporary
//! file is removed on every exit path.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

/// Cap on a single webhook request, connect through response body
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// PCM stream format as declared by the client.
///
/// Values are packaged into the WAV header verbatim; the session machine
/// guarantees they are positive before they get here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub rate: u32,
    /// Bytes per sample
    pub width: u16,
    /// Number of interleaved channels
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            rate: 16000,
            width: 2,
            channels: 1,
        }
    }
}

/// Seam between the session machine and the transcription backend
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Submit one finished utterance.
    ///
    /// Returns the transcript text, or `None` when the backend produced
    /// nothing usable (error, timeout, or a response without text).
    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Option<String>;
}

/// Transcriber backed by a single multipart POST to a webhook endpoint
pub struct WebhookTranscriber {
    webhook_url: String,
    client: reqwest::Client,
}

impl WebhookTranscriber {
    pub fn new(webhook_url: String) -> Result<Self> {
        Self::with_timeout(webhook_url, REQUEST_TIMEOUT)
    }

    /// Same as [`Self::new`] with a custom request timeout
    pub fn with_timeout(webhook_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            webhook_url,
            client,
        })
    }

    /// One submission attempt: temp WAV, upload, parse. No retries.
    async fn submit(&self, audio: &[u8], format: AudioFormat) -> Result<Option<String>> {
        let tmp = write_temp_wav(audio, format)?;
        debug!(path = ?tmp.path(), "temporary WAV file written");

        let result = self.upload(tmp.path()).await;

        // Drop would remove the file too, but closing explicitly lets a
        // failed removal reach the log.
        if let Err(e) = tmp.close() {
            warn!(?e, "failed to remove temporary WAV file");
        }

        result
    }

    async fn upload(&self, path: &Path) -> Result<Option<String>> {
        let wav = tokio::fs::read(path)
            .await
            .context("failed to read temporary WAV file")?;

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .context("failed to build WAV form part")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        debug!(url = %self.webhook_url, "posting audio to webhook");
        let response = self
            .client
            .post(&self.webhook_url)
            .multipart(form)
            .send()
            .await
            .context("webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "webhook returned error status");
            return Ok(None);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .context("failed to parse webhook response as JSON")?;
        debug!(%data, "webhook response");

        // A response without a string "text" field is "no result", not an error
        Ok(data
            .get("text")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned))
    }
}

#[async_trait]
impl Transcriber for WebhookTranscriber {
    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Option<String> {
        match self.submit(audio, format).await {
            Ok(text) => text,
            Err(e) => {
                error!(err = ?e, "transcription submission failed");
                None
            }
        }
    }
}

/// Write the audio into a fresh temporary WAV file
fn write_temp_wav(audio: &[u8], format: AudioFormat) -> Result<NamedTempFile> {
    let mut tmp = tempfile::Builder::new()
        .prefix("wyoming-stt-")
        .suffix(".wav")
        .tempfile()
        .context("failed to create temporary WAV file")?;
    tmp.write_all(&wav_bytes(audio, format))
        .context("failed to write temporary WAV file")?;
    tmp.flush()?;
    Ok(tmp)
}

/// Build a complete RIFF/WAVE file: 44-byte PCM header plus the raw bytes.
///
/// Format values go in unchanged; there is no resampling and no inspection
/// of the sample data.
fn wav_bytes(pcm: &[u8], format: AudioFormat) -> Vec<u8> {
    // The session machine only accepts formats whose bits-per-sample and
    // block align fit these 16-bit fields; wide intermediates keep the
    // arithmetic itself from overflowing.
    let bits_per_sample = (u32::from(format.width) * 8) as u16;
    let block_align = u32::from(format.channels) * u32::from(format.width);
    let byte_rate = (u64::from(format.rate) * u64::from(block_align)) as u32;
    let data_size = pcm.len() as u32;

    let mut wav = Vec::with_capacity(44 + pcm.len());

    // RIFF chunk
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_size).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&format.channels.to_le_bytes());
    wav.extend_from_slice(&format.rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&(block_align as u16).to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data sub-chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm);

    wav
}
