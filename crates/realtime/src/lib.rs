//! WebSocket clients for the DashScope realtime API.
//!
//! ASR and TTS share one endpoint and one wire vocabulary; the model query
//! parameter selects the service. Each client splits its socket into a
//! writer task fed by an mpsc channel and a reader task that decodes wire
//! events and forwards them to the caller.

pub mod asr;
pub mod events;
pub mod tts;

mod transport;

pub use asr::{AsrClient, AsrConfig, AsrEvent};
pub use tts::{TtsClient, TtsConfig, TtsEvent};
