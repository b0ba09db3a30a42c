//! Per-connection session state machine
//!
//! One `Session` exists per client connection and is owned exclusively by
//! that connection's task, so event handling is strictly sequential with no
//! locking. The machine tracks whether a transcription was requested, the
//! accumulated audio, and the declared stream format, and calls the
//! transcriber exactly once per armed stream end.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::transcribe::{AudioFormat, Transcriber};
use crate::wyoming::event::{AsrModel, AsrProgram, Attribution, Event, Info};

/// What the connection loop should do after an event is handled
#[derive(Debug, PartialEq)]
pub struct Outcome {
    /// Event to write back to the client, if any
    pub response: Option<Event>,
    /// Whether to close the connection after responding
    pub close: bool,
}

impl Outcome {
    fn none() -> Self {
        Self {
            response: None,
            close: false,
        }
    }

    fn respond(event: Event) -> Self {
        Self {
            response: Some(event),
            close: false,
        }
    }

    fn respond_and_close(event: Event) -> Self {
        Self {
            response: Some(event),
            close: true,
        }
    }
}

/// Session state for one client connection
pub struct Session<T> {
    transcriber: Arc<T>,
    /// Armed by `transcribe`, disarmed after a stream end is processed
    transcribe_requested: bool,
    /// Audio accumulated since the last `transcribe`, in arrival order
    audio: Vec<u8>,
    /// Last valid format declaration, defaults until one arrives
    format: AudioFormat,
}

impl<T: Transcriber> Session<T> {
    pub fn new(transcriber: Arc<T>) -> Self {
        Self {
            transcriber,
            transcribe_requested: false,
            audio: Vec::new(),
            format: AudioFormat::default(),
        }
    }

    /// Whether a transcription request is armed
    pub fn armed(&self) -> bool {
        self.transcribe_requested
    }

    /// Bytes buffered so far
    pub fn buffered(&self) -> usize {
        self.audio.len()
    }

    /// Process one inbound event and decide what to send back.
    ///
    /// The only suspension point is the transcriber call on an armed stream
    /// end; everything else completes synchronously.
    pub async fn handle_event(&mut self, event: Event) -> Outcome {
        match event {
            Event::Describe => Outcome::respond(Event::Info(capability_info())),

            Event::Transcribe => {
                info!("transcribe received, recording");
                self.transcribe_requested = true;
                self.audio.clear();
                Outcome::none()
            }

            Event::AudioStart {
                rate,
                width,
                channels,
            } => {
                self.declare_format(rate, width, channels);
                Outcome::none()
            }

            Event::AudioChunk { payload } => {
                self.audio.extend_from_slice(&payload);
                Outcome::none()
            }

            Event::AudioStop => self.finish_stream().await,

            Event::Unsupported { event_type } => {
                debug!(%event_type, "ignoring unsupported event");
                Outcome::none()
            }

            // Outbound-only kinds arriving from a client are treated the
            // same as unsupported ones.
            Event::Info(_) | Event::Transcript { .. } => {
                debug!(event_type = %event.event_type(), "ignoring outbound-only event from client");
                Outcome::none()
            }
        }
    }

    /// Apply a format declaration if all three values are positive and in
    /// range, otherwise keep the previous (or default) format.
    fn declare_format(&mut self, rate: i64, width: i64, channels: i64) {
        let accepted = (
            u32::try_from(rate).ok().filter(|rate| *rate > 0),
            u16::try_from(width).ok().filter(|width| *width > 0),
            u16::try_from(channels).ok().filter(|channels| *channels > 0),
        );

        match accepted {
            // The WAV bits-per-sample and block-align fields are 16-bit;
            // a format they cannot express would wrap in the header.
            (Some(rate), Some(width), Some(channels))
                if u32::from(width) * 8 <= u32::from(u16::MAX)
                    && u32::from(channels) * u32::from(width) <= u32::from(u16::MAX) =>
            {
                self.format = AudioFormat {
                    rate,
                    width,
                    channels,
                };
                debug!(rate, width, channels, "audio format declared");
            }
            _ => {
                warn!(
                    rate,
                    width,
                    channels,
                    kept = ?self.format,
                    "rejecting audio-start with invalid format"
                );
            }
        }
    }

    /// Handle a stream end: submit if armed, otherwise treat it as stray
    async fn finish_stream(&mut self) -> Outcome {
        if !self.transcribe_requested {
            info!("audio-stop without transcribe request, ignoring");
            self.audio.clear();
            return Outcome::none();
        }

        info!(bytes = self.audio.len(), "audio-stop received, submitting for transcription");
        let text = self
            .transcriber
            .transcribe(&self.audio, self.format)
            .await;

        let text = match text {
            Some(text) => {
                info!(text = %text, "transcription complete");
                text
            }
            None => {
                info!("transcription failed or empty");
                String::new()
            }
        };

        self.transcribe_requested = false;
        self.audio.clear();

        Outcome::respond_and_close(Event::Transcript { text })
    }
}

const PROGRAM_NAME: &str = "webhook-stt";
const PROGRAM_VERSION: &str = "1.0";
const MODEL_NAME: &str = "whisper-webhook";
const MODEL_VERSION: &str = "2025.07.01";

/// Static capability description advertised on `describe`
pub fn capability_info() -> Info {
    Info {
        asr: vec![AsrProgram {
            name: PROGRAM_NAME.to_string(),
            description: "Speech to text via HTTP webhook relay".to_string(),
            attribution: Attribution {
                name: "Webhook STT bridge".to_string(),
                url: "https://github.com/rhasspy/wyoming".to_string(),
            },
            installed: true,
            version: PROGRAM_VERSION.to_string(),
            models: vec![AsrModel {
                name: MODEL_NAME.to_string(),
                description: "Whisper transcription behind the webhook".to_string(),
                attribution: Attribution {
                    name: "OpenAI Whisper".to_string(),
                    url: "https://github.com/openai/whisper".to_string(),
                },
                installed: true,
                version: MODEL_VERSION.to_string(),
                languages: vec!["it".to_string()],
            }],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Transcriber stub that records every submission and answers with a
    /// canned result.
    struct StubTranscriber {
        result: Option<String>,
        calls: Mutex<Vec<(Vec<u8>, AudioFormat)>>,
    }

    impl StubTranscriber {
        fn returning(result: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                result: result.map(str::to_owned),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Vec<u8>, AudioFormat)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Option<String> {
            self.calls.lock().unwrap().push((audio.to_vec(), format));
            self.result.clone()
        }
    }

    #[tokio::test]
    async fn test_describe_responds_without_mutating_state() {
        let stub = StubTranscriber::returning(Some("hi"));
        let mut session = Session::new(Arc::clone(&stub));

        session.handle_event(Event::Transcribe).await;
        session
            .handle_event(Event::AudioChunk {
                payload: vec![1, 2, 3],
            })
            .await;

        let outcome = session.handle_event(Event::Describe).await;
        assert_eq!(
            outcome.response,
            Some(Event::Info(capability_info()))
        );
        assert!(!outcome.close);
        assert!(session.armed());
        assert_eq!(session.buffered(), 3);
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_chunks_submitted_in_arrival_order() {
        let stub = StubTranscriber::returning(Some("ok"));
        let mut session = Session::new(Arc::clone(&stub));

        session.handle_event(Event::Transcribe).await;
        for payload in [b"abc".to_vec(), Vec::new(), b"def".to_vec()] {
            session.handle_event(Event::AudioChunk { payload }).await;
        }
        session.handle_event(Event::AudioStop).await;

        let calls = stub.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, b"abcdef");
    }

    #[tokio::test]
    async fn test_transcribe_rearm_clears_buffer() {
        let stub = StubTranscriber::returning(Some("ok"));
        let mut session = Session::new(Arc::clone(&stub));

        session.handle_event(Event::Transcribe).await;
        session
            .handle_event(Event::AudioChunk {
                payload: b"stale".to_vec(),
            })
            .await;
        session.handle_event(Event::Transcribe).await;
        session
            .handle_event(Event::AudioChunk {
                payload: b"fresh".to_vec(),
            })
            .await;
        session.handle_event(Event::AudioStop).await;

        assert_eq!(stub.calls()[0].0, b"fresh");
    }

    #[tokio::test]
    async fn test_stray_stop_never_submits_or_closes() {
        let stub = StubTranscriber::returning(Some("never"));
        let mut session = Session::new(Arc::clone(&stub));

        session
            .handle_event(Event::AudioChunk {
                payload: b"orphan".to_vec(),
            })
            .await;
        let outcome = session.handle_event(Event::AudioStop).await;

        assert_eq!(outcome.response, None);
        assert!(!outcome.close);
        assert!(stub.calls().is_empty());
        assert_eq!(session.buffered(), 0);
    }

    #[tokio::test]
    async fn test_armed_stop_submits_once_and_closes() {
        let stub = StubTranscriber::returning(Some("hello"));
        let mut session = Session::new(Arc::clone(&stub));

        session.handle_event(Event::Transcribe).await;
        session
            .handle_event(Event::AudioChunk {
                payload: vec![0u8; 200],
            })
            .await;
        let outcome = session.handle_event(Event::AudioStop).await;

        assert_eq!(
            outcome.response,
            Some(Event::Transcript {
                text: "hello".to_string()
            })
        );
        assert!(outcome.close);
        assert_eq!(stub.calls().len(), 1);
        assert!(!session.armed());
        assert_eq!(session.buffered(), 0);
    }

    #[tokio::test]
    async fn test_failed_submission_emits_empty_transcript_and_closes() {
        let stub = StubTranscriber::returning(None);
        let mut session = Session::new(Arc::clone(&stub));

        session.handle_event(Event::Transcribe).await;
        let outcome = session.handle_event(Event::AudioStop).await;

        assert_eq!(
            outcome.response,
            Some(Event::Transcript {
                text: String::new()
            })
        );
        assert!(outcome.close);
        assert_eq!(stub.calls().len(), 1);
        assert_eq!(stub.calls()[0].0, b"");
    }

    #[tokio::test]
    async fn test_format_last_write_wins() {
        let stub = StubTranscriber::returning(Some("ok"));
        let mut session = Session::new(Arc::clone(&stub));

        session.handle_event(Event::Transcribe).await;
        session
            .handle_event(Event::AudioStart {
                rate: 16000,
                width: 2,
                channels: 1,
            })
            .await;
        session
            .handle_event(Event::AudioStart {
                rate: 8000,
                width: 1,
                channels: 2,
            })
            .await;
        session.handle_event(Event::AudioStop).await;

        assert_eq!(
            stub.calls()[0].1,
            AudioFormat {
                rate: 8000,
                width: 1,
                channels: 2
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_format_keeps_previous() {
        let stub = StubTranscriber::returning(Some("ok"));
        let mut session = Session::new(Arc::clone(&stub));

        session.handle_event(Event::Transcribe).await;
        session
            .handle_event(Event::AudioStart {
                rate: 48000,
                width: 2,
                channels: 1,
            })
            .await;
        // Zero width and a negative rate must both be rejected in full
        session
            .handle_event(Event::AudioStart {
                rate: 8000,
                width: 0,
                channels: 1,
            })
            .await;
        session
            .handle_event(Event::AudioStart {
                rate: -1,
                width: 1,
                channels: 1,
            })
            .await;
        session.handle_event(Event::AudioStop).await;

        assert_eq!(
            stub.calls()[0].1,
            AudioFormat {
                rate: 48000,
                width: 2,
                channels: 1
            }
        );
    }

    #[tokio::test]
    async fn test_format_too_wide_for_wav_header_keeps_previous() {
        let stub = StubTranscriber::returning(Some("ok"));
        let mut session = Session::new(Arc::clone(&stub));

        session.handle_event(Event::Transcribe).await;
        session
            .handle_event(Event::AudioStart {
                rate: 16000,
                width: 2,
                channels: 1,
            })
            .await;
        // 8192-byte samples would wrap the 16-bit bits-per-sample field
        session
            .handle_event(Event::AudioStart {
                rate: 16000,
                width: 8192,
                channels: 1,
            })
            .await;
        // As would a block align beyond 16 bits
        session
            .handle_event(Event::AudioStart {
                rate: 16000,
                width: 4,
                channels: 20000,
            })
            .await;
        session.handle_event(Event::AudioStop).await;

        assert_eq!(
            stub.calls()[0].1,
            AudioFormat {
                rate: 16000,
                width: 2,
                channels: 1
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_format_before_any_declaration_keeps_defaults() {
        let stub = StubTranscriber::returning(Some("ok"));
        let mut session = Session::new(Arc::clone(&stub));

        session.handle_event(Event::Transcribe).await;
        session
            .handle_event(Event::AudioStart {
                rate: 0,
                width: 0,
                channels: 0,
            })
            .await;
        session.handle_event(Event::AudioStop).await;

        assert_eq!(stub.calls()[0].1, AudioFormat::default());
    }

    #[tokio::test]
    async fn test_unsupported_event_is_a_no_op() {
        let stub = StubTranscriber::returning(Some("ok"));
        let mut session = Session::new(Arc::clone(&stub));

        session.handle_event(Event::Transcribe).await;
        let outcome = session
            .handle_event(Event::Unsupported {
                event_type: "voice-started".to_string(),
            })
            .await;

        assert_eq!(outcome.response, None);
        assert!(!outcome.close);
        assert!(session.armed());
    }
}
