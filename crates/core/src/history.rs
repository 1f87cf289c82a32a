//! Conversation turns and the sliding-window history replayed to generation.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One dialogue turn, in the shape chat completion endpoints expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Ordered dialogue history with a sliding-window cap: once the cap is
/// exceeded the oldest turns are dropped first, preserving the relative
/// order of the remainder.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self { turns: VecDeque::new(), max_turns }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    /// Builds the message list for a generation call: the system prompt
    /// followed by the dialogue turns in insertion order.
    pub fn with_system(&self, system_prompt: &str) -> Vec<ConversationTurn> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(ConversationTurn::system(system_prompt));
        messages.extend(self.turns.iter().cloned());
        messages
    }

    /// Formats the dialogue for the evaluator: assistant turns as the
    /// interviewer, user turns as the candidate. System turns never appear
    /// in the transcript.
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .filter_map(|turn| match turn.role {
                Role::Assistant => Some(format!("面试官: {}", turn.content)),
                Role::User => Some(format!("候选人: {}", turn.content)),
                Role::System => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Transcript of only the most recent `n` turns, oldest first.
    pub fn recent_transcript(&self, n: usize) -> String {
        let skip = self.turns.len().saturating_sub(n);
        self.turns
            .iter()
            .skip(skip)
            .filter_map(|turn| match turn.role {
                Role::Assistant => Some(format!("面试官: {}", turn.content)),
                Role::User => Some(format!("候选人: {}", turn.content)),
                Role::System => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
