//! Streaming chat generation backend.
//!
//! The orchestrator never talks to a provider SDK directly: it asks a
//! [`ChatBackend`] for a lazy stream of [`ChatEvent`]s on a channel and
//! drains it. [`DashScopeChat`] implements the trait against the DashScope
//! OpenAI-compatible chat completion endpoint using server-sent events.

use crate::history::ConversationTurn;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;

/// One item of a generation stream. A stream is a finite sequence of
/// `Delta`s terminated by exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Delta(String),
    Done,
    Error(String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Starts one streaming generation call. Deltas arrive lazily on the
    /// returned channel in generation order.
    async fn stream_chat(
        &self,
        messages: Vec<ConversationTurn>,
    ) -> Result<mpsc::Receiver<ChatEvent>>;
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Chat completion client for the DashScope OpenAI-compatible endpoint.
pub struct DashScopeChat {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
}

impl DashScopeChat {
    pub fn new(api_key: SecretString, base_url: &str, model: &str, temperature: f32) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
        }
    }
}

#[async_trait]
impl ChatBackend for DashScopeChat {
    async fn stream_chat(
        &self,
        messages: Vec<ConversationTurn>,
    ) -> Result<mpsc::Receiver<ChatEvent>> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": true,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let (tx, rx) = mpsc::channel(256);

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            let _ = tx
                .send(ChatEvent::Error(format!("请求失败: code={status}, message={detail}")))
                .await;
            return Ok(rx);
        }

        // Drain the SSE body on its own task so the caller consumes deltas
        // lazily through the channel.
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut line_buffer = String::new();
            let mut terminated = false;

            'outer: while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                        terminated = true;
                        break;
                    }
                };
                line_buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = line_buffer.find('\n') {
                    let line = line_buffer[..newline].trim().to_string();
                    line_buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        let _ = tx.send(ChatEvent::Done).await;
                        terminated = true;
                        break 'outer;
                    }
                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(parsed) => {
                            if let Some(choice) = parsed.choices.first() {
                                if let Some(content) = &choice.delta.content {
                                    if !content.is_empty()
                                        && tx.send(ChatEvent::Delta(content.clone())).await.is_err()
                                    {
                                        // Receiver gone, stop reading.
                                        return;
                                    }
                                }
                                if choice.finish_reason.as_deref() == Some("stop") {
                                    let _ = tx.send(ChatEvent::Done).await;
                                    terminated = true;
                                    break 'outer;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!("skipping unparseable stream chunk: {}", e);
                        }
                    }
                }
            }

            if !terminated {
                // Body ended without an explicit terminator; treat as done.
                let _ = tx.send(ChatEvent::Done).await;
            }
        });

        Ok(rx)
    }
}
