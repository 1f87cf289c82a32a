//! Streaming speech synthesis client.
//!
//! The session runs in commit mode: each sentence is appended and committed
//! as its own unit, and audio for successive commits arrives strictly in
//! commit order. Decoded PCM chunks go out on a dedicated audio channel so
//! the caller can relay them without touching the control events.

use crate::events::{ClientEvent, ServerEvent, SessionUpdate};
use crate::transport;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::SecretString;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: SecretString,
    pub voice: String,
    pub sample_rate: u32,
    /// Upper bound on waiting for the synthesizer to drain during shutdown.
    pub finish_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TtsEvent {
    Created,
    /// Audio for one committed sentence is complete.
    Done,
    Error(String),
    Closed,
}

pub struct TtsClient {
    tx: mpsc::Sender<ClientEvent>,
    finished: watch::Receiver<bool>,
    finish_timeout: Duration,
}

impl TtsClient {
    /// Connects and configures the voice. Decoded PCM goes to `audio_tx`,
    /// control events to `event_tx`.
    pub async fn connect(
        config: &TtsConfig,
        audio_tx: mpsc::Sender<Vec<u8>>,
        event_tx: mpsc::Sender<TtsEvent>,
    ) -> Result<Self> {
        let (tx, reader) =
            transport::open(&config.base_url, &config.model, &config.api_key).await?;

        let session = SessionUpdate::new()
            .with_voice(&config.voice)
            .with_output_audio_format("pcm")
            .with_sample_rate(config.sample_rate)
            .with_mode("commit");
        tx.send(ClientEvent::SessionUpdate { session })
            .await
            .context("synthesizer rejected session configuration")?;

        let (finished_tx, finished_rx) = watch::channel(false);
        let mut wire_rx = transport::spawn_reader(reader, "tts");
        tokio::spawn(async move {
            while let Some(event) = wire_rx.recv().await {
                match event {
                    ServerEvent::SessionCreated => {
                        if event_tx.send(TtsEvent::Created).await.is_err() {
                            break;
                        }
                    }
                    ServerEvent::ResponseAudioDelta { delta } => match BASE64.decode(&delta) {
                        Ok(pcm) => {
                            if audio_tx.send(pcm).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("dropping undecodable audio delta: {e}"),
                    },
                    ServerEvent::ResponseDone => {
                        if event_tx.send(TtsEvent::Done).await.is_err() {
                            break;
                        }
                    }
                    ServerEvent::SessionFinished => break,
                    ServerEvent::Error { error } => {
                        if event_tx.send(TtsEvent::Error(error.message)).await.is_err() {
                            break;
                        }
                    }
                    other => tracing::trace!("ignoring synthesizer event: {other:?}"),
                }
            }
            let _ = finished_tx.send(true);
            let _ = event_tx.send(TtsEvent::Closed).await;
        });

        Ok(Self {
            tx,
            finished: finished_rx,
            finish_timeout: config.finish_timeout,
        })
    }

    /// Submits one sanitized sentence for synthesis. Returns once the
    /// sentence is accepted, not once its audio has played out.
    pub async fn synthesize(&self, text: &str) -> Result<()> {
        self.tx
            .send(ClientEvent::InputTextBufferAppend {
                text: text.to_string(),
            })
            .await
            .context("synthesizer connection is gone")?;
        self.tx
            .send(ClientEvent::InputTextBufferCommit)
            .await
            .context("synthesizer connection is gone")
    }

    /// Asks the synthesizer to flush remaining audio and close, waiting at
    /// most `finish_timeout` for the session to wind down.
    pub async fn finish(&self) -> Result<()> {
        self.tx
            .send(ClientEvent::SessionFinish)
            .await
            .context("synthesizer connection is gone")?;

        let mut finished = self.finished.clone();
        let wait = async move {
            while !*finished.borrow_and_update() {
                if finished.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(self.finish_timeout, wait).await.is_err() {
            tracing::warn!("synthesizer did not finish within {:?}", self.finish_timeout);
        }
        Ok(())
    }
}
