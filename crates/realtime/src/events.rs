//! Wire events for the DashScope realtime endpoint.
//!
//! ASR and TTS speak the same vocabulary; fields a given service does not
//! use are simply omitted from `session.update`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_text_buffer.append")]
    InputTextBufferAppend { text: String },
    #[serde(rename = "input_text_buffer.commit")]
    InputTextBufferCommit,
    #[serde(rename = "session.finish")]
    SessionFinish,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionParams {
    pub language: String,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modalities(mut self, modalities: &[&str]) -> Self {
        self.modalities = Some(modalities.iter().map(|m| m.to_string()).collect());
        self
    }

    pub fn with_input_audio_format(mut self, format: &str) -> Self {
        self.input_audio_format = Some(format.to_string());
        self
    }

    pub fn with_transcription(mut self, params: TranscriptionParams) -> Self {
        self.input_audio_transcription = Some(params);
        self
    }

    pub fn with_output_audio_format(mut self, format: &str) -> Self {
        self.output_audio_format = Some(format.to_string());
        self
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        self.voice = Some(voice.to_string());
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_mode(mut self, mode: &str) -> Self {
        self.mode = Some(mode.to_string());
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,
    /// Incremental transcription of the in-flight utterance.
    #[serde(rename = "conversation.item.input_audio_transcription.text")]
    TranscriptionText {
        #[serde(default)]
        stash: String,
    },
    /// Final transcript for one committed utterance.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    /// Base64-encoded PCM chunk from the synthesizer.
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "session.finished")]
    SessionFinished,
    #[serde(rename = "error")]
    Error { error: WireError },
    /// Wire events this client has no use for.
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_update_omits_unset_fields() {
        let event = ClientEvent::SessionUpdate {
            session: SessionUpdate::new()
                .with_voice("Maia")
                .with_mode("commit")
                .with_sample_rate(24000),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "Maia");
        assert_eq!(json["session"]["mode"], "commit");
        assert!(json["session"].get("input_audio_format").is_none());
    }

    #[test]
    fn unit_events_carry_only_a_type() {
        let json = serde_json::to_string(&ClientEvent::InputTextBufferCommit).unwrap();
        assert_eq!(json, r#"{"type":"input_text_buffer.commit"}"#);
    }

    #[test]
    fn partial_transcription_deserializes_from_stash() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"conversation.item.input_audio_transcription.text","stash":"你好"}"#,
        )
        .unwrap();
        assert!(matches!(event, ServerEvent::TranscriptionText { stash } if stash == "你好"));
    }

    #[test]
    fn unrecognized_event_types_become_unknown() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"rate_limits.updated","limits":[]}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn error_event_keeps_the_message() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"error","error":{"code":"invalid_api_key","message":"鉴权失败"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.code.as_deref(), Some("invalid_api_key"));
                assert_eq!(error.message, "鉴权失败");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
