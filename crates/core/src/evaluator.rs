//! Structured candidate evaluation.
//!
//! Each interview turn the transcript is sent to the model for a structured
//! verdict. The model is asked for strict JSON but is not trusted to produce
//! it: parsing falls back to extracting the first brace-delimited object,
//! malformed replies are retried after a pause, transport failures back off
//! exponentially, and after three attempts the evaluator yields a safe
//! CONTINUE so the interview stays alive.

use crate::prompts;
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Total attempts per evaluation, counting the first.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvaluationAction {
    Continue,
    Pass,
    Fail,
}

/// Verdict for one interview turn. Ephemeral, never persisted past the turn.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub action: EvaluationAction,
    pub score: u8,
    pub assessment: String,
}

impl EvaluationResult {
    /// The liveness-preserving default used when evaluation keeps failing.
    pub fn fallback() -> Self {
        Self {
            action: EvaluationAction::Continue,
            score: 50,
            assessment: "评估失败，默认继续".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvaluation {
    action: Option<String>,
    current_score: Option<i64>,
    assessment: Option<String>,
}

/// Parses the model's verdict. Tries a strict parse first, then the first
/// brace-delimited object inside the raw text. Unknown actions degrade to
/// CONTINUE and scores are clamped to 0..=100.
pub fn parse_evaluation(raw: &str) -> Result<EvaluationResult> {
    let parsed: RawEvaluation = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            let start = raw.find('{');
            let end = raw.rfind('}');
            let (Some(start), Some(end)) = (start, end) else {
                anyhow::bail!("no JSON object in evaluator output: {raw:?}");
            };
            serde_json::from_str(&raw[start..=end])
                .with_context(|| format!("unparseable evaluator output: {raw:?}"))?
        }
    };

    let action = match parsed.action.as_deref().map(str::to_uppercase).as_deref() {
        Some("PASS") => EvaluationAction::Pass,
        Some("FAIL") => EvaluationAction::Fail,
        _ => EvaluationAction::Continue,
    };
    let score = parsed.current_score.unwrap_or(50).clamp(0, 100) as u8;

    Ok(EvaluationResult {
        action,
        score,
        assessment: parsed.assessment.unwrap_or_default(),
    })
}

/// Decides the fate of one candidate answer given the full transcript.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        topic: &str,
        transcript: &str,
        followup_count: u32,
    ) -> Result<EvaluationResult>;
}

/// The buffered (non-streaming) completion transport behind the evaluator.
/// Separated from [`EvaluatorClient`] so retry behavior is testable without
/// a network.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Sends one chat completion request body and returns the message content.
    async fn complete(&self, body: serde_json::Value) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

pub struct DashScopeCompletion {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl DashScopeCompletion {
    pub fn new(api_key: SecretString, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CompletionApi for DashScopeCompletion {
    async fn complete(&self, body: serde_json::Value) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("evaluation request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("评估请求失败: code={status}, message={detail}");
        }

        let parsed = response
            .json::<CompletionResponse>()
            .await
            .context("failed to decode evaluation response")?;
        let content = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("no choices in evaluation response"))?;
        Ok(content)
    }
}

/// Evaluator backed by a completion transport, with the retry policy above.
pub struct EvaluatorClient<C: CompletionApi> {
    api: C,
    model: String,
    max_followup: u32,
    pass_threshold: u8,
}

impl<C: CompletionApi> EvaluatorClient<C> {
    pub fn new(api: C, model: &str, max_followup: u32, pass_threshold: u8) -> Self {
        Self {
            api,
            model: model.to_string(),
            max_followup,
            pass_threshold,
        }
    }

    fn request_body(&self, topic: &str, transcript: &str, followup_count: u32) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": prompts::evaluator_prompt(topic, self.pass_threshold),
                },
                {
                    "role": "user",
                    "content": prompts::evaluation_request(
                        transcript,
                        followup_count,
                        self.max_followup,
                    ),
                },
            ],
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
        })
    }
}

#[async_trait]
impl<C: CompletionApi> Evaluator for EvaluatorClient<C> {
    async fn evaluate(
        &self,
        topic: &str,
        transcript: &str,
        followup_count: u32,
    ) -> Result<EvaluationResult> {
        let body = self.request_body(topic, transcript, followup_count);

        for attempt in 0..MAX_ATTEMPTS {
            match self.api.complete(body.clone()).await {
                Ok(raw) => match parse_evaluation(&raw) {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        tracing::warn!(attempt, "malformed evaluation: {e:#}");
                        if attempt + 1 < MAX_ATTEMPTS {
                            sleep(Duration::from_secs(1)).await;
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(attempt, "evaluation call failed: {e:#}");
                    if attempt + 1 < MAX_ATTEMPTS {
                        sleep(Duration::from_secs(1u64 << attempt)).await;
                    }
                }
            }
        }

        tracing::error!("evaluation exhausted {MAX_ATTEMPTS} attempts, defaulting to CONTINUE");
        Ok(EvaluationResult::fallback())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_json_parses() {
        let result = parse_evaluation(
            r#"{"action": "PASS", "current_score": 85, "assessment": "回答扎实"}"#,
        )
        .unwrap();
        assert_eq!(result.action, EvaluationAction::Pass);
        assert_eq!(result.score, 85);
        assert_eq!(result.assessment, "回答扎实");
    }

    #[test]
    fn object_is_extracted_from_surrounding_prose() {
        let raw = "好的，我的评估如下：\n{\"action\": \"FAIL\", \"current_score\": 30, \"assessment\": \"概念模糊\"}\n以上。";
        let result = parse_evaluation(raw).unwrap();
        assert_eq!(result.action, EvaluationAction::Fail);
        assert_eq!(result.score, 30);
    }

    #[test]
    fn unknown_action_degrades_to_continue() {
        let result =
            parse_evaluation(r#"{"action": "MAYBE", "current_score": 120}"#).unwrap();
        assert_eq!(result.action, EvaluationAction::Continue);
        assert_eq!(result.score, 100); // clamped
        assert_eq!(result.assessment, "");
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_evaluation("抱歉，我无法评估。").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn three_malformed_replies_yield_the_safe_default() {
        let mut api = MockCompletionApi::new();
        api.expect_complete()
            .times(3)
            .returning(|_| Ok("这不是JSON".to_string()));

        let client = EvaluatorClient::new(api, "qwen-plus", 5, 70);
        let result = client.evaluate("Kafka", "面试官: ...", 2).await.unwrap();

        assert_eq!(result, EvaluationResult::fallback());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_back_off_then_default() {
        let mut api = MockCompletionApi::new();
        api.expect_complete()
            .times(3)
            .returning(|_| Err(anyhow::anyhow!("timeout")));

        let client = EvaluatorClient::new(api, "qwen-plus", 5, 70);
        let result = client.evaluate("Kafka", "面试官: ...", 1).await.unwrap();

        assert_eq!(result.action, EvaluationAction::Continue);
        assert_eq!(result.score, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt() {
        let mut api = MockCompletionApi::new();
        let mut calls = 0u32;
        api.expect_complete().times(2).returning_st(move |_| {
            calls += 1;
            if calls == 1 {
                Ok("oops".to_string())
            } else {
                Ok(r#"{"action": "CONTINUE", "current_score": 65, "assessment": "再看看"}"#
                    .to_string())
            }
        });

        let client = EvaluatorClient::new(api, "qwen-plus", 5, 70);
        let result = client.evaluate("Redis", "候选人: ...", 1).await.unwrap();

        assert_eq!(result.action, EvaluationAction::Continue);
        assert_eq!(result.score, 65);
    }
}
