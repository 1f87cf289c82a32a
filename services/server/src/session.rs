//! Per-connection session orchestrator.
//!
//! A session owns one recognizer connection, one synthesizer connection, and
//! the conversation state. Recognizer events, synthesizer events, and
//! synthesized audio are forwarded to the client by dispatch loops that run
//! for the life of the session. A reply pipeline run is single-flight: a new
//! utterance arriving while one is active is rejected, never interleaved.

use crate::config::Config;
use crate::protocol::ServerMessage;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hirevox_core::chat::ChatBackend;
use hirevox_core::evaluator::Evaluator;
use hirevox_core::history::{ConversationHistory, ConversationTurn};
use hirevox_core::interview::{InterviewConfig, InterviewSession, InterviewStep};
use hirevox_core::pipeline::run_reply;
use hirevox_core::sanitize::clean_for_tts;
use hirevox_core::prompts;
use hirevox_realtime::asr::{AsrClient, AsrConfig, AsrEvent};
use hirevox_realtime::tts::{TtsClient, TtsConfig, TtsEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};

/// Waiting period after committing audio, giving the recognizer time to
/// deliver the trailing transcript.
const TRANSCRIPT_FLUSH_WAIT: Duration = Duration::from_millis(500);

/// Dependencies shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub config: Arc<Config>,
    pub chat: Arc<dyn ChatBackend>,
    pub evaluator: Arc<dyn Evaluator>,
    pub backend_permits: Arc<Semaphore>,
}

pub struct Session {
    id: String,
    outbound: mpsc::Sender<ServerMessage>,
    asr: AsrClient,
    asr_config: AsrConfig,
    asr_event_tx: mpsc::Sender<AsrEvent>,
    recognized: Arc<StdMutex<String>>,
    tts: Arc<TtsClient>,
    ctx: PipelineCtx,
}

impl Session {
    /// Connects both realtime backends and starts the dispatch loops.
    /// All-or-nothing: if either backend refuses, the session never exists.
    pub async fn initialize(
        id: String,
        deps: SessionDeps,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<Self> {
        let config = &deps.config;
        let asr_config = AsrConfig {
            base_url: config.ws_base_url.clone(),
            model: config.asr_model.clone(),
            api_key: config.api_key.clone(),
            sample_rate: config.asr_sample_rate,
            language: config.asr_language.clone(),
        };
        let tts_config = TtsConfig {
            base_url: config.ws_base_url.clone(),
            model: config.tts_model.clone(),
            api_key: config.api_key.clone(),
            voice: config.tts_voice.clone(),
            sample_rate: config.tts_sample_rate,
            finish_timeout: config.tts_flush_timeout,
        };

        let (asr_event_tx, asr_event_rx) = mpsc::channel(256);
        let (tts_event_tx, tts_event_rx) = mpsc::channel(64);
        let (audio_tx, audio_rx) = mpsc::channel(256);

        let (asr, tts) = tokio::try_join!(
            AsrClient::connect(&asr_config, asr_event_tx.clone()),
            TtsClient::connect(&tts_config, audio_tx, tts_event_tx),
        )
        .context("failed to connect realtime backends")?;
        let tts = Arc::new(tts);

        let recognized = Arc::new(StdMutex::new(String::new()));
        spawn_asr_loop(asr_event_rx, outbound.clone(), recognized.clone());
        spawn_tts_loop(tts_event_rx, outbound.clone());
        spawn_audio_loop(audio_rx, outbound.clone());

        let (sentence_tx, sentence_rx) = mpsc::channel::<String>(64);
        spawn_sentence_submitter(sentence_rx, tts.clone(), outbound.clone());

        let interview_config = InterviewConfig {
            min_followup: config.min_followup,
            max_followup: config.max_followup,
            pass_threshold: config.pass_threshold,
        };
        let ctx = PipelineCtx {
            session_id: id.clone(),
            outbound: outbound.clone(),
            chat: deps.chat.clone(),
            evaluator: deps.evaluator.clone(),
            permits: deps.backend_permits.clone(),
            history: Arc::new(Mutex::new(ConversationHistory::new(config.max_history_turns))),
            interview: Arc::new(Mutex::new(InterviewSession::new(
                interview_config,
                config.max_history_turns,
            ))),
            sentence_tx,
            busy: Arc::new(AtomicBool::new(false)),
        };

        tracing::info!(session = %id, "session initialized");
        Ok(Self {
            id,
            outbound,
            asr,
            asr_config,
            asr_event_tx,
            recognized,
            tts,
            ctx,
        })
    }

    async fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message).await;
    }

    /// Forwards one base64 audio chunk to the recognizer.
    pub async fn submit_audio(&self, data: String) {
        if BASE64.decode(&data).is_err() {
            self.send(ServerMessage::error("session", "音频数据不是有效的base64"))
                .await;
            return;
        }
        if let Err(e) = self.asr.append_audio(data).await {
            tracing::error!(session = %self.id, "failed to forward audio: {e:#}");
            self.send(ServerMessage::error("asr", "语音识别服务不可用"))
                .await;
        }
    }

    /// Ends the utterance: commits buffered audio, waits for the trailing
    /// transcript, rotates in a fresh recognizer session, and runs the reply
    /// pipeline on whatever was recognized.
    pub async fn end_utterance(&mut self) {
        if let Err(e) = self.asr.finalize().await {
            tracing::error!(session = %self.id, "failed to finalize utterance: {e:#}");
            self.send(ServerMessage::error("asr", "语音识别服务不可用"))
                .await;
            return;
        }
        tokio::time::sleep(TRANSCRIPT_FLUSH_WAIT).await;

        // The committed session is spent; the next utterance needs its own.
        match AsrClient::connect(&self.asr_config, self.asr_event_tx.clone()).await {
            Ok(fresh) => {
                let spent = std::mem::replace(&mut self.asr, fresh);
                spent.close();
            }
            Err(e) => {
                tracing::error!(session = %self.id, "failed to reconnect recognizer: {e:#}");
                self.send(ServerMessage::error("asr", "语音识别服务重连失败"))
                    .await;
            }
        }

        let text = match self.recognized.lock() {
            Ok(mut recognized) => std::mem::take(&mut *recognized),
            Err(_) => String::new(),
        };
        if text.trim().is_empty() {
            tracing::debug!(session = %self.id, "empty utterance, nothing to do");
            return;
        }
        self.process_text(text).await;
    }

    /// Runs the reply pipeline for one piece of user text. Single-flight:
    /// rejected outright if a run is already active.
    pub async fn process_text(&self, text: String) {
        if self.ctx.busy.swap(true, Ordering::SeqCst) {
            self.send(ServerMessage::error("session", "上一轮回复尚未处理完成"))
                .await;
            return;
        }
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            ctx.run(&text).await;
            ctx.busy.store(false, Ordering::SeqCst);
        });
    }

    /// Starts (or restarts) a structured interview and speaks the opening
    /// question directly, without a model call.
    pub async fn start_interview(&self, topic: String, position: String, resume: String) {
        if self.ctx.busy.swap(true, Ordering::SeqCst) {
            self.send(ServerMessage::error("session", "上一轮回复尚未处理完成"))
                .await;
            return;
        }

        let question = {
            let mut interview = self.ctx.interview.lock().await;
            let question = interview.start(&topic, &position, &resume);
            interview.record_assistant_turn(&question);
            question
        };
        tracing::info!(session = %self.id, %topic, "interview started");

        self.send(ServerMessage::InterviewStarted {
            question: question.clone(),
        })
        .await;
        self.send(ServerMessage::ResponseStarted).await;
        self.send(ServerMessage::ResponseDelta {
            text: question.clone(),
        })
        .await;
        self.send(ServerMessage::ResponseDone {
            text: question.clone(),
        })
        .await;

        let spoken = clean_for_tts(&question);
        if !spoken.is_empty() {
            let _ = self.ctx.sentence_tx.send(spoken).await;
        }
        self.ctx.busy.store(false, Ordering::SeqCst);
    }

    pub async fn reset_interview(&self) {
        self.ctx.interview.lock().await.reset();
        tracing::info!(session = %self.id, "interview reset");
    }

    pub async fn clear_history(&self) {
        self.ctx.history.lock().await.clear();
        self.send(ServerMessage::HistoryCleared).await;
    }

    /// Idempotent teardown: closes the recognizer and gives the synthesizer
    /// a bounded chance to drain.
    pub async fn cleanup(self) {
        self.asr.close();
        drop(self.ctx);
        if let Err(e) = self.tts.finish().await {
            tracing::debug!(session = %self.id, "synthesizer teardown: {e:#}");
        }
        tracing::info!(session = %self.id, "session closed");
    }
}

/// Everything one reply pipeline run needs, detached from the session so the
/// run can be spawned while the connection keeps reading.
#[derive(Clone)]
struct PipelineCtx {
    session_id: String,
    outbound: mpsc::Sender<ServerMessage>,
    chat: Arc<dyn ChatBackend>,
    evaluator: Arc<dyn Evaluator>,
    permits: Arc<Semaphore>,
    history: Arc<Mutex<ConversationHistory>>,
    interview: Arc<Mutex<InterviewSession>>,
    sentence_tx: mpsc::Sender<String>,
    busy: Arc<AtomicBool>,
}

impl PipelineCtx {
    async fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message).await;
    }

    async fn run(&self, text: &str) {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        self.send(ServerMessage::ResponseStarted).await;

        let interview_active = self.interview.lock().await.is_started();
        let result = if interview_active {
            self.run_interview_turn(text).await
        } else {
            self.run_chat_turn(text).await
        };
        if let Err(e) = result {
            tracing::error!(session = %self.session_id, "reply generation failed: {e:#}");
            self.send(ServerMessage::error("llm", "回复生成失败，请重试"))
                .await;
        }
    }

    /// Free-form chat: one user turn in, one generated assistant turn out.
    /// On failure the user turn stays in history; only the assistant turn is
    /// withheld.
    async fn run_chat_turn(&self, text: &str) -> Result<()> {
        let messages = {
            let mut history = self.history.lock().await;
            history.push(ConversationTurn::user(text));
            history.with_system(prompts::CHAT_SYSTEM_PROMPT)
        };

        let full = self.generate(messages).await?;
        self.history
            .lock()
            .await
            .push(ConversationTurn::assistant(&full));
        self.send(ServerMessage::ResponseDone { text: full }).await;
        Ok(())
    }

    /// One interview turn: record the answer, evaluate, then speak either
    /// the next follow-up or the conclusion.
    async fn run_interview_turn(&self, text: &str) -> Result<()> {
        let mut interview = self.interview.lock().await;

        let step = match interview
            .process_candidate_response(self.evaluator.as_ref(), text)
            .await
        {
            Ok(step) => step,
            Err(e) => {
                self.send(ServerMessage::error("session", e.to_string()))
                    .await;
                return Ok(());
            }
        };

        match step {
            InterviewStep::Followup(verdict) => {
                tracing::debug!(
                    session = %self.session_id,
                    score = verdict.score,
                    "continuing interview"
                );
                let full = self.generate(interview.followup_messages()).await?;
                interview.record_assistant_turn(&full);
                self.send(ServerMessage::ResponseDone { text: full }).await;
            }
            InterviewStep::Passed(_) | InterviewStep::Failed(_) => {
                match self.generate(interview.conclusion_messages()).await {
                    Ok(full) => {
                        interview.record_assistant_turn(&full);
                        self.send(ServerMessage::ResponseDone { text: full }).await;
                    }
                    Err(e) => {
                        tracing::error!(
                            session = %self.session_id,
                            "conclusion generation failed: {e:#}"
                        );
                        self.send(ServerMessage::error("llm", "回复生成失败，请重试"))
                            .await;
                    }
                }
                // The verdict stands whether or not the closing words made it.
                self.send(ServerMessage::InterviewFinished {
                    summary: interview.summary(),
                })
                .await;
            }
        }
        Ok(())
    }

    /// Streams one model reply through the sentence pipeline: raw deltas go
    /// to the client as captions, sanitized sentences to the synthesizer.
    async fn generate(&self, messages: Vec<ConversationTurn>) -> Result<String> {
        let chat_rx = self.chat.stream_chat(messages).await?;

        let (delta_tx, mut delta_rx) = mpsc::channel::<String>(64);
        let outbound = self.outbound.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(text) = delta_rx.recv().await {
                if outbound
                    .send(ServerMessage::ResponseDelta { text })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let result = run_reply(chat_rx, delta_tx, self.sentence_tx.clone()).await;
        let _ = forwarder.await;
        Ok(result?)
    }
}

fn spawn_asr_loop(
    mut events: mpsc::Receiver<AsrEvent>,
    outbound: mpsc::Sender<ServerMessage>,
    recognized: Arc<StdMutex<String>>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let message = match event {
                AsrEvent::Created => {
                    tracing::debug!("recognizer session ready");
                    continue;
                }
                AsrEvent::Partial(text) => ServerMessage::TranscriptionPartial { text },
                AsrEvent::Final(text) => {
                    if let Ok(mut recognized) = recognized.lock() {
                        *recognized = text.clone();
                    }
                    ServerMessage::TranscriptionFinal { text }
                }
                AsrEvent::SpeechStarted => ServerMessage::SpeechStarted,
                AsrEvent::SpeechStopped => ServerMessage::SpeechStopped,
                AsrEvent::Error(message) => {
                    tracing::error!("recognizer error: {message}");
                    ServerMessage::error("asr", message)
                }
                AsrEvent::Closed => {
                    // One utterance session ended; the channel stays open for
                    // its replacement.
                    tracing::debug!("recognizer session closed");
                    continue;
                }
            };
            if outbound.send(message).await.is_err() {
                break;
            }
        }
    });
}

fn spawn_tts_loop(mut events: mpsc::Receiver<TtsEvent>, outbound: mpsc::Sender<ServerMessage>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TtsEvent::Created => tracing::debug!("synthesizer session ready"),
                TtsEvent::Done => tracing::debug!("sentence audio complete"),
                TtsEvent::Error(message) => {
                    tracing::error!("synthesizer error: {message}");
                    if outbound
                        .send(ServerMessage::error("tts", message))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                TtsEvent::Closed => {
                    tracing::debug!("synthesizer session closed");
                    break;
                }
            }
        }
    });
}

fn spawn_audio_loop(mut audio: mpsc::Receiver<Vec<u8>>, outbound: mpsc::Sender<ServerMessage>) {
    tokio::spawn(async move {
        while let Some(pcm) = audio.recv().await {
            let message = ServerMessage::AudioDelta {
                data: BASE64.encode(&pcm),
            };
            if outbound.send(message).await.is_err() {
                break;
            }
        }
    });
}

/// Submits sanitized sentences to the synthesizer one at a time, preserving
/// pipeline order across an entire reply.
fn spawn_sentence_submitter(
    mut sentences: mpsc::Receiver<String>,
    tts: Arc<TtsClient>,
    outbound: mpsc::Sender<ServerMessage>,
) {
    tokio::spawn(async move {
        while let Some(sentence) = sentences.recv().await {
            if let Err(e) = tts.synthesize(&sentence).await {
                tracing::error!("sentence synthesis failed: {e:#}");
                let _ = outbound
                    .send(ServerMessage::error("tts", "语音合成服务不可用"))
                    .await;
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hirevox_core::chat::ChatEvent;
    use hirevox_core::evaluator::{EvaluationAction, EvaluationResult};

    /// Scripted chat backend: replays a fixed delta sequence.
    struct StubChat {
        deltas: Vec<&'static str>,
    }

    #[async_trait]
    impl ChatBackend for StubChat {
        async fn stream_chat(
            &self,
            _messages: Vec<ConversationTurn>,
        ) -> anyhow::Result<mpsc::Receiver<ChatEvent>> {
            let (tx, rx) = mpsc::channel(16);
            let deltas: Vec<String> = self.deltas.iter().map(|d| d.to_string()).collect();
            tokio::spawn(async move {
                for delta in deltas {
                    let _ = tx.send(ChatEvent::Delta(delta)).await;
                }
                let _ = tx.send(ChatEvent::Done).await;
            });
            Ok(rx)
        }
    }

    struct StubEvaluator {
        action: EvaluationAction,
        score: u8,
    }

    #[async_trait]
    impl Evaluator for StubEvaluator {
        async fn evaluate(
            &self,
            _topic: &str,
            _transcript: &str,
            _followup_count: u32,
        ) -> anyhow::Result<EvaluationResult> {
            Ok(EvaluationResult {
                action: self.action,
                score: self.score,
                assessment: "stub".to_string(),
            })
        }
    }

    fn ctx(
        chat: StubChat,
        evaluator: StubEvaluator,
    ) -> (PipelineCtx, mpsc::Receiver<ServerMessage>, mpsc::Receiver<String>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (sentence_tx, sentence_rx) = mpsc::channel(64);
        let ctx = PipelineCtx {
            session_id: "sess-test".to_string(),
            outbound: outbound_tx,
            chat: Arc::new(chat),
            evaluator: Arc::new(evaluator),
            permits: Arc::new(Semaphore::new(2)),
            history: Arc::new(Mutex::new(ConversationHistory::new(20))),
            interview: Arc::new(Mutex::new(InterviewSession::new(
                InterviewConfig::default(),
                20,
            ))),
            sentence_tx,
            busy: Arc::new(AtomicBool::new(false)),
        };
        (ctx, outbound_rx, sentence_rx)
    }

    async fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn chat_turn_streams_captions_and_sentences() {
        let chat = StubChat {
            deltas: vec!["先说A。", "再说B！"],
        };
        let evaluator = StubEvaluator {
            action: EvaluationAction::Continue,
            score: 50,
        };
        let (ctx, mut outbound_rx, mut sentence_rx) = ctx(chat, evaluator);

        ctx.run("你好").await;

        let sentences: Vec<String> = {
            let mut collected = Vec::new();
            while let Ok(sentence) = sentence_rx.try_recv() {
                collected.push(sentence);
            }
            collected
        };
        assert_eq!(sentences, ["先说A。", "再说B！"]);

        let messages = drain(&mut outbound_rx).await;
        assert!(matches!(messages.first(), Some(ServerMessage::ResponseStarted)));
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::ResponseDone { text } if text == "先说A。再说B！")));

        let history = ctx.history.lock().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().map(|t| t.content.as_str()), Some("先说A。再说B！"));
    }

    #[tokio::test]
    async fn interview_turn_finishes_with_a_snapshot() {
        let chat = StubChat {
            deltas: vec!["面试到此结束。"],
        };
        let evaluator = StubEvaluator {
            action: EvaluationAction::Fail,
            score: 30,
        };
        let (ctx, mut outbound_rx, _sentence_rx) = ctx(chat, evaluator);
        {
            let mut interview = ctx.interview.lock().await;
            let question = interview.start("Kafka", "后端工程师", "");
            interview.record_assistant_turn(&question);
        }

        ctx.run("不太了解").await;

        let messages = drain(&mut outbound_rx).await;
        let finished = messages.iter().find_map(|m| match m {
            ServerMessage::InterviewFinished { summary } => Some(summary),
            _ => None,
        });
        let summary = finished.expect("no interview.finished message");
        assert!(summary.is_finished);
        assert_eq!(summary.score, 30);
        assert!(ctx.interview.lock().await.is_finished());
    }

    #[tokio::test]
    async fn second_turn_after_finish_is_rejected_without_killing_the_session() {
        let chat = StubChat { deltas: vec!["结束。"] };
        let evaluator = StubEvaluator {
            action: EvaluationAction::Fail,
            score: 20,
        };
        let (ctx, mut outbound_rx, _sentence_rx) = ctx(chat, evaluator);
        {
            let mut interview = ctx.interview.lock().await;
            interview.start("Redis", "后端工程师", "");
        }

        ctx.run("第一轮").await;
        drain(&mut outbound_rx).await;

        ctx.run("第二轮").await;
        let messages = drain(&mut outbound_rx).await;
        assert!(messages.iter().any(|m| matches!(
            m,
            ServerMessage::Error { source, .. } if source == "session"
        )));
    }
}
