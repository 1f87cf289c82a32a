//! The streaming reply pipeline: one generation run from first delta to
//! final sentence.
//!
//! Deltas are drained from the chat backend's channel. Each delta is
//! forwarded immediately for live captioning and appended to a sentence
//! buffer; every sentence the buffer completes is sanitized and emitted on
//! the synthesis channel without waiting for synthesis to finish, so
//! segmentation keeps pace with generation. Sentences leave in the exact
//! left-to-right order they were completed.

use crate::chat::ChatEvent;
use crate::sanitize::clean_for_tts;
use crate::segment::SentenceSplitter;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The generation backend reported a non-success status mid-stream. The
    /// run aborts and the caller must not commit an assistant turn.
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Drains one generation stream, emitting captions on `delta_tx` and
/// sanitized sentences on `sentence_tx`. Returns the full accumulated reply.
///
/// Sends on the two outbound channels are best-effort: a dropped receiver
/// (session tearing down) stops that output without failing the run.
pub async fn run_reply(
    mut chat_rx: mpsc::Receiver<ChatEvent>,
    delta_tx: mpsc::Sender<String>,
    sentence_tx: mpsc::Sender<String>,
) -> Result<String, PipelineError> {
    let mut splitter = SentenceSplitter::new();
    let mut full_response = String::new();

    while let Some(event) = chat_rx.recv().await {
        match event {
            ChatEvent::Delta(delta) => {
                full_response.push_str(&delta);
                let _ = delta_tx.send(delta.clone()).await;
                for sentence in splitter.push(&delta) {
                    submit_sentence(&sentence_tx, &sentence).await;
                }
            }
            ChatEvent::Done => break,
            ChatEvent::Error(message) => return Err(PipelineError::Generation(message)),
        }
    }

    // Whatever trails the last delimiter is still worth speaking.
    if let Some(rest) = splitter.flush() {
        submit_sentence(&sentence_tx, &rest).await;
    }

    Ok(full_response)
}

async fn submit_sentence(sentence_tx: &mpsc::Sender<String>, sentence: &str) {
    let clean = clean_for_tts(sentence);
    if !clean.is_empty() {
        let _ = sentence_tx.send(clean).await;
    }
}
