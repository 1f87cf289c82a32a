//! JSON protocol between browser clients and the server.
//!
//! One WebSocket per session; every frame is a JSON object discriminated by
//! its `type` field.

use hirevox_core::interview::InterviewSummary;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// One chunk of base64-encoded PCM microphone audio.
    #[serde(rename = "audio.input")]
    AudioInput { data: String },
    /// The utterance is over; transcribe and respond.
    #[serde(rename = "audio.end")]
    AudioEnd,
    /// Typed input, bypassing recognition.
    #[serde(rename = "text.input")]
    TextInput { text: String },
    #[serde(rename = "clear.history")]
    ClearHistory,
    #[serde(rename = "interview.start")]
    InterviewStart {
        topic: String,
        #[serde(default)]
        position: String,
        #[serde(default)]
        resume: String,
    },
    #[serde(rename = "interview.reset")]
    InterviewReset,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session.created")]
    SessionCreated { session_id: String },
    #[serde(rename = "transcription.partial")]
    TranscriptionPartial { text: String },
    #[serde(rename = "transcription.final")]
    TranscriptionFinal { text: String },
    #[serde(rename = "speech.started")]
    SpeechStarted,
    #[serde(rename = "speech.stopped")]
    SpeechStopped,
    #[serde(rename = "response.started")]
    ResponseStarted,
    /// One raw token chunk, for live captions.
    #[serde(rename = "response.delta")]
    ResponseDelta { text: String },
    /// The complete assistant reply.
    #[serde(rename = "response.done")]
    ResponseDone { text: String },
    /// One chunk of base64-encoded synthesized PCM.
    #[serde(rename = "audio.delta")]
    AudioDelta { data: String },
    #[serde(rename = "history.cleared")]
    HistoryCleared,
    #[serde(rename = "interview.started")]
    InterviewStarted { question: String },
    #[serde(rename = "interview.finished")]
    InterviewFinished {
        #[serde(flatten)]
        summary: InterviewSummary,
    },
    #[serde(rename = "error")]
    Error { source: String, message: String },
}

impl ServerMessage {
    pub fn error(source: &str, message: impl Into<String>) -> Self {
        Self::Error {
            source: source.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_deserialize_by_type() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"audio.input","data":"AAAA"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::AudioInput { data } if data == "AAAA"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"audio.end"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::AudioEnd));
    }

    #[test]
    fn interview_start_defaults_optional_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"interview.start","topic":"Kafka"}"#).unwrap();
        match msg {
            ClientMessage::InterviewStart {
                topic,
                position,
                resume,
            } => {
                assert_eq!(topic, "Kafka");
                assert!(position.is_empty());
                assert!(resume.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_message_types_are_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"video.input"}"#).is_err());
    }

    #[test]
    fn server_messages_carry_the_type_tag() {
        let json = serde_json::to_string(&ServerMessage::ResponseDelta {
            text: "你好".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"response.delta","text":"你好"}"#);

        let json = serde_json::to_string(&ServerMessage::error("llm", "boom")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["source"], "llm");
    }

    #[test]
    fn finished_snapshot_is_flattened() {
        let mut session = hirevox_core::interview::InterviewSession::new(
            hirevox_core::interview::InterviewConfig::default(),
            20,
        );
        session.start("Redis", "后端", "");
        let json =
            serde_json::to_value(ServerMessage::InterviewFinished {
                summary: session.summary(),
            })
            .unwrap();
        assert_eq!(json["type"], "interview.finished");
        assert_eq!(json["topic"], "Redis");
        assert_eq!(json["is_finished"], false);
        assert_eq!(json["score"], 50);
    }
}
