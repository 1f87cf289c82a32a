//! Streaming speech recognition client.
//!
//! One client transcribes exactly one utterance stream: the caller appends
//! base64 audio, then calls [`AsrClient::finalize`] to commit it. The final
//! transcript arrives as [`AsrEvent::Final`] on the event channel, after
//! which the session is spent and a fresh client must be connected for the
//! next utterance.

use crate::events::{ClientEvent, ServerEvent, SessionUpdate, TranscriptionParams};
use crate::transport;
use anyhow::{Context, Result};
use secrecy::SecretString;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: SecretString,
    pub sample_rate: u32,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AsrEvent {
    Created,
    /// Running transcript of the in-flight utterance.
    Partial(String),
    /// Transcript of the committed utterance.
    Final(String),
    SpeechStarted,
    SpeechStopped,
    Error(String),
    Closed,
}

pub struct AsrClient {
    tx: mpsc::Sender<ClientEvent>,
}

impl AsrClient {
    /// Connects, configures transcription, and starts forwarding recognizer
    /// events on `event_tx`.
    pub async fn connect(config: &AsrConfig, event_tx: mpsc::Sender<AsrEvent>) -> Result<Self> {
        let (tx, reader) =
            transport::open(&config.base_url, &config.model, &config.api_key).await?;

        let session = SessionUpdate::new()
            .with_modalities(&["text"])
            .with_input_audio_format("pcm16")
            .with_transcription(TranscriptionParams {
                language: config.language.clone(),
                sample_rate: config.sample_rate,
            });
        tx.send(ClientEvent::SessionUpdate { session })
            .await
            .context("recognizer rejected session configuration")?;

        let mut wire_rx = transport::spawn_reader(reader, "asr");
        tokio::spawn(async move {
            while let Some(event) = wire_rx.recv().await {
                let mapped = match event {
                    ServerEvent::SessionCreated => Some(AsrEvent::Created),
                    ServerEvent::TranscriptionText { stash } => Some(AsrEvent::Partial(stash)),
                    ServerEvent::TranscriptionCompleted { transcript } => {
                        Some(AsrEvent::Final(transcript))
                    }
                    ServerEvent::SpeechStarted => Some(AsrEvent::SpeechStarted),
                    ServerEvent::SpeechStopped => Some(AsrEvent::SpeechStopped),
                    ServerEvent::SessionFinished => break,
                    ServerEvent::Error { error } => Some(AsrEvent::Error(error.message)),
                    other => {
                        tracing::trace!("ignoring recognizer event: {other:?}");
                        None
                    }
                };
                if let Some(mapped) = mapped {
                    if event_tx.send(mapped).await.is_err() {
                        break;
                    }
                }
            }
            let _ = event_tx.send(AsrEvent::Closed).await;
        });

        Ok(Self { tx })
    }

    /// Appends one chunk of base64-encoded PCM audio.
    pub async fn append_audio(&self, audio: String) -> Result<()> {
        self.tx
            .send(ClientEvent::InputAudioBufferAppend { audio })
            .await
            .context("recognizer connection is gone")
    }

    /// Commits the buffered audio. The final transcript follows on the event
    /// channel and the session cannot accept further audio.
    pub async fn finalize(&self) -> Result<()> {
        self.tx
            .send(ClientEvent::SessionFinish)
            .await
            .context("recognizer connection is gone")
    }

    /// Tears the connection down. The writer task exits once the last sender
    /// is dropped.
    pub fn close(self) {
        drop(self.tx);
    }
}
