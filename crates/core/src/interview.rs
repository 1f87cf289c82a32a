//! Interview session state machine.
//!
//! A session asks a deterministic opening question, then loops: candidate
//! answer in, evaluation verdict, and either another follow-up or a final
//! pass/fail conclusion. Decision order matters and is fixed: the pass rule
//! is checked before the fail rule, and only after the minimum number of
//! follow-ups has been reached can the interview end at all (except on an
//! explicit FAIL verdict).

use crate::evaluator::{EvaluationAction, EvaluationResult, Evaluator};
use crate::history::{ConversationHistory, ConversationTurn};
use crate::prompts;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct InterviewConfig {
    pub min_followup: u32,
    pub max_followup: u32,
    pub pass_threshold: u8,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            min_followup: 3,
            max_followup: 5,
            pass_threshold: 70,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InterviewOutcome {
    Pass,
    Fail,
}

/// What the session should do after one candidate answer.
#[derive(Debug, Clone, PartialEq)]
pub enum InterviewStep {
    /// Ask another question. Carries the verdict for logging.
    Followup(EvaluationResult),
    /// Conclude positively.
    Passed(EvaluationResult),
    /// Conclude negatively.
    Failed(EvaluationResult),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterviewError {
    #[error("面试尚未开始")]
    NotStarted,
    #[error("面试已经结束")]
    AlreadyFinished,
}

/// Snapshot sent to the client when the interview concludes.
#[derive(Debug, Serialize)]
pub struct InterviewSummary {
    pub is_finished: bool,
    pub result: Option<InterviewOutcome>,
    pub score: u8,
    pub assessment: String,
    pub topic: String,
    pub followup_count: u32,
}

pub struct InterviewSession {
    config: InterviewConfig,
    topic: String,
    position: String,
    resume_summary: String,
    history: ConversationHistory,
    followup_count: u32,
    current_score: u8,
    started: bool,
    finished: bool,
    final_result: Option<InterviewOutcome>,
    final_assessment: String,
}

impl InterviewSession {
    pub fn new(config: InterviewConfig, max_history_turns: usize) -> Self {
        Self {
            config,
            topic: String::new(),
            position: String::new(),
            resume_summary: String::new(),
            history: ConversationHistory::new(max_history_turns),
            followup_count: 0,
            current_score: 50,
            started: false,
            finished: false,
            final_result: None,
            final_assessment: String::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Resets all state and returns the deterministic opening question, which
    /// the caller speaks and must record via [`Self::record_assistant_turn`].
    pub fn start(&mut self, topic: &str, position: &str, resume_summary: &str) -> String {
        self.reset();
        self.topic = topic.to_string();
        self.position = position.to_string();
        self.resume_summary = resume_summary.to_string();
        self.started = true;
        prompts::opening_question(&self.topic)
    }

    pub fn reset(&mut self) {
        self.topic.clear();
        self.position.clear();
        self.resume_summary.clear();
        self.history.clear();
        self.followup_count = 0;
        self.current_score = 50;
        self.started = false;
        self.finished = false;
        self.final_result = None;
        self.final_assessment.clear();
    }

    /// Records one candidate answer and decides how to proceed. Evaluation
    /// failure never aborts the interview; the safe default keeps it going.
    pub async fn process_candidate_response(
        &mut self,
        evaluator: &dyn Evaluator,
        text: &str,
    ) -> Result<InterviewStep, InterviewError> {
        if !self.started {
            return Err(InterviewError::NotStarted);
        }
        if self.finished {
            return Err(InterviewError::AlreadyFinished);
        }

        self.history.push(ConversationTurn::user(text));
        self.followup_count += 1;

        let transcript = self.history.transcript();
        let verdict = evaluator
            .evaluate(&self.topic, &transcript, self.followup_count)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("evaluator unavailable: {e:#}");
                EvaluationResult::fallback()
            });
        self.current_score = verdict.score;

        let reached_min = self.followup_count >= self.config.min_followup;
        let reached_max = self.followup_count >= self.config.max_followup;

        if reached_min
            && (verdict.action == EvaluationAction::Pass
                || (reached_max && verdict.score >= self.config.pass_threshold))
        {
            self.finish(InterviewOutcome::Pass, &verdict.assessment);
            return Ok(InterviewStep::Passed(verdict));
        }
        if verdict.action == EvaluationAction::Fail
            || (reached_max && verdict.score < self.config.pass_threshold)
        {
            self.finish(InterviewOutcome::Fail, &verdict.assessment);
            return Ok(InterviewStep::Failed(verdict));
        }
        Ok(InterviewStep::Followup(verdict))
    }

    fn finish(&mut self, outcome: InterviewOutcome, assessment: &str) {
        self.finished = true;
        self.final_result = Some(outcome);
        self.final_assessment = assessment.to_string();
        tracing::info!(
            topic = %self.topic,
            followups = self.followup_count,
            score = self.current_score,
            ?outcome,
            "interview concluded"
        );
    }

    pub fn record_assistant_turn(&mut self, text: &str) {
        self.history.push(ConversationTurn::assistant(text));
    }

    /// Messages for generating the next follow-up question.
    pub fn followup_messages(&self) -> Vec<ConversationTurn> {
        let mut system = prompts::followup_prompt(&self.topic, &self.position);
        if !self.resume_summary.is_empty() {
            system.push_str("\n\n候选人简历摘要：\n");
            system.push_str(&self.resume_summary);
        }
        let mut messages = vec![ConversationTurn::system(&system)];
        messages.extend(self.history.turns().cloned());
        messages
    }

    /// Messages for generating the closing remarks after a verdict.
    pub fn conclusion_messages(&self) -> Vec<ConversationTurn> {
        let outcome = match self.final_result {
            Some(InterviewOutcome::Pass) => "通过",
            _ => "未通过",
        };
        vec![
            ConversationTurn::system(&prompts::conclusion_prompt(&self.topic)),
            ConversationTurn::user(&prompts::conclusion_request(
                outcome,
                &self.final_assessment,
                &self.history.recent_transcript(4),
            )),
        ]
    }

    pub fn summary(&self) -> InterviewSummary {
        InterviewSummary {
            is_finished: self.finished,
            result: self.final_result,
            score: self.current_score,
            assessment: self.final_assessment.clone(),
            topic: self.topic.clone(),
            followup_count: self.followup_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::MockEvaluator;

    fn session() -> InterviewSession {
        InterviewSession::new(InterviewConfig::default(), 20)
    }

    fn verdict(action: EvaluationAction, score: u8) -> EvaluationResult {
        EvaluationResult {
            action,
            score,
            assessment: "测试评语".to_string(),
        }
    }

    fn evaluator_with(action: EvaluationAction, score: u8) -> MockEvaluator {
        let mut mock = MockEvaluator::new();
        mock.expect_evaluate()
            .returning(move |_, _, _| Ok(verdict(action, score)));
        mock
    }

    async fn run_turns(
        session: &mut InterviewSession,
        evaluator: &MockEvaluator,
        turns: u32,
    ) -> InterviewStep {
        let mut last = None;
        for i in 0..turns {
            let step = session
                .process_candidate_response(evaluator, &format!("回答{i}"))
                .await
                .unwrap();
            session.record_assistant_turn("追问");
            last = Some(step);
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn pass_verdict_before_min_followups_keeps_going() {
        let mut s = session();
        s.start("Kafka", "后端工程师", "");
        let evaluator = evaluator_with(EvaluationAction::Pass, 80);

        let step = run_turns(&mut s, &evaluator, 2).await;
        assert!(matches!(step, InterviewStep::Followup(_)));
        assert!(!s.is_finished());
    }

    #[tokio::test]
    async fn pass_verdict_at_min_followups_passes() {
        let mut s = session();
        s.start("Kafka", "后端工程师", "");
        let evaluator = evaluator_with(EvaluationAction::Pass, 80);

        let step = run_turns(&mut s, &evaluator, 3).await;
        assert!(matches!(step, InterviewStep::Passed(_)));
        assert_eq!(s.summary().result, Some(InterviewOutcome::Pass));
    }

    #[tokio::test]
    async fn fail_verdict_ends_immediately() {
        let mut s = session();
        s.start("Kafka", "后端工程师", "");
        let evaluator = evaluator_with(EvaluationAction::Fail, 40);

        let step = run_turns(&mut s, &evaluator, 1).await;
        assert!(matches!(step, InterviewStep::Failed(_)));
        assert_eq!(s.summary().result, Some(InterviewOutcome::Fail));
    }

    #[tokio::test]
    async fn max_followups_above_threshold_passes() {
        let mut s = session();
        s.start("Redis", "后端工程师", "");
        let evaluator = evaluator_with(EvaluationAction::Continue, 75);

        let step = run_turns(&mut s, &evaluator, 5).await;
        assert!(matches!(step, InterviewStep::Passed(_)));
        let summary = s.summary();
        assert_eq!(summary.result, Some(InterviewOutcome::Pass));
        assert_eq!(summary.score, 75);
    }

    #[tokio::test]
    async fn max_followups_below_threshold_fails() {
        let mut s = session();
        s.start("Redis", "后端工程师", "");
        let evaluator = evaluator_with(EvaluationAction::Continue, 60);

        let step = run_turns(&mut s, &evaluator, 5).await;
        assert!(matches!(step, InterviewStep::Failed(_)));
        assert_eq!(s.summary().result, Some(InterviewOutcome::Fail));
    }

    #[tokio::test]
    async fn answers_are_rejected_outside_an_active_interview() {
        let mut s = session();
        let evaluator = MockEvaluator::new();
        let err = s
            .process_candidate_response(&evaluator, "喂？")
            .await
            .unwrap_err();
        assert_eq!(err, InterviewError::NotStarted);

        s.start("Kafka", "后端工程师", "");
        let evaluator = evaluator_with(EvaluationAction::Fail, 10);
        run_turns(&mut s, &evaluator, 1).await;
        let err = s
            .process_candidate_response(&evaluator, "再给次机会")
            .await
            .unwrap_err();
        assert_eq!(err, InterviewError::AlreadyFinished);
    }

    #[tokio::test]
    async fn evaluator_failure_falls_back_to_continue() {
        let mut s = session();
        s.start("Kafka", "后端工程师", "");
        let mut evaluator = MockEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _, _| Err(anyhow::anyhow!("network down")));

        let step = run_turns(&mut s, &evaluator, 1).await;
        match step {
            InterviewStep::Followup(v) => assert_eq!(v, EvaluationResult::fallback()),
            other => panic!("unexpected step: {other:?}"),
        }
    }
}
