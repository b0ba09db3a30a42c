//! Wyoming TCP server
//!
//! Accepts client connections and runs one session per connection on its
//! own task. Sessions share nothing; the only shared handle is the
//! transcriber, which keeps no per-call state.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::session::Session;
use crate::transcribe::Transcriber;

use super::codec::{read_event, write_event};

pub struct Server<T> {
    listener: TcpListener,
    transcriber: Arc<T>,
}

impl<T: Transcriber + 'static> Server<T> {
    /// Bind the listen socket
    pub async fn bind(addr: &str, transcriber: Arc<T>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!(%addr, "Wyoming server listening");

        Ok(Self {
            listener,
            transcriber,
        })
    }

    /// Run the accept loop, spawning a task per connection
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "client connected");
                    let transcriber = Arc::clone(&self.transcriber);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, transcriber).await {
                            warn!(?e, %peer, "connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }
}

/// Drive one connection: read events in arrival order, feed them to the
/// session, write back any response, and stop on close or disconnect.
///
/// Generic over the stream so tests can run it over an in-memory duplex.
pub async fn handle_connection<S, T>(stream: S, transcriber: Arc<T>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Transcriber,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut session = Session::new(transcriber);

    loop {
        let event = match read_event(&mut reader).await? {
            Some(event) => event,
            None => {
                debug!("client disconnected");
                return Ok(());
            }
        };

        let outcome = session.handle_event(event).await;

        if let Some(response) = outcome.response {
            write_event(&mut write_half, &response).await?;
        }

        if outcome.close {
            debug!("closing connection after transcription");
            write_half.shutdown().await?;
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::AudioFormat;
    use crate::wyoming::event::Event;
    use async_trait::async_trait;
    use tokio::io::DuplexStream;

    struct FixedTranscriber {
        result: Option<&'static str>,
    }

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _audio: &[u8], _format: AudioFormat) -> Option<String> {
            self.result.map(str::to_owned)
        }
    }

    fn spawn_handler(
        result: Option<&'static str>,
    ) -> (
        BufReader<tokio::io::ReadHalf<DuplexStream>>,
        tokio::io::WriteHalf<DuplexStream>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let transcriber = Arc::new(FixedTranscriber { result });
        tokio::spawn(async move {
            handle_connection(server, transcriber).await.unwrap();
        });

        let (read_half, write_half) = tokio::io::split(client);
        (BufReader::new(read_half), write_half)
    }

    #[tokio::test]
    async fn test_describe_gets_info() {
        let (mut reader, mut writer) = spawn_handler(Some("unused"));

        write_event(&mut writer, &Event::Describe).await.unwrap();
        let response = read_event(&mut reader).await.unwrap().unwrap();

        assert!(matches!(response, Event::Info(_)));
    }

    #[tokio::test]
    async fn test_full_transcription_cycle_closes_connection() {
        let (mut reader, mut writer) = spawn_handler(Some("hello"));

        write_event(&mut writer, &Event::Transcribe).await.unwrap();
        write_event(
            &mut writer,
            &Event::AudioStart {
                rate: 16000,
                width: 2,
                channels: 1,
            },
        )
        .await
        .unwrap();
        write_event(
            &mut writer,
            &Event::AudioChunk {
                payload: vec![0u8; 200],
            },
        )
        .await
        .unwrap();
        write_event(&mut writer, &Event::AudioStop).await.unwrap();

        let response = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(
            response,
            Event::Transcript {
                text: "hello".to_string()
            }
        );

        // Server side shuts down after the transcript
        assert!(read_event(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stray_stop_keeps_connection_open() {
        let (mut reader, mut writer) = spawn_handler(Some("unused"));

        write_event(&mut writer, &Event::AudioStop).await.unwrap();
        // A describe after the stray stop still gets answered, proving the
        // stop produced no response and did not close the connection.
        write_event(&mut writer, &Event::Describe).await.unwrap();

        let response = read_event(&mut reader).await.unwrap().unwrap();
        assert!(matches!(response, Event::Info(_)));
    }

    #[tokio::test]
    async fn test_failed_backend_still_answers_with_empty_text() {
        let (mut reader, mut writer) = spawn_handler(None);

        write_event(&mut writer, &Event::Transcribe).await.unwrap();
        write_event(&mut writer, &Event::AudioStop).await.unwrap();

        let response = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(
            response,
            Event::Transcript {
                text: String::new()
            }
        );
        assert!(read_event(&mut reader).await.unwrap().is_none());
    }
}
