//! Application configuration.
//!
//! Everything is loaded from environment variables (a local `.env` is honored
//! via dotenvy) into one shareable struct. Only the API key is required;
//! every other variable has a production default.

use secrecy::SecretString;
use std::env;
use std::time::Duration;
use tracing::Level;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: SecretString,
    pub asr_model: String,
    pub asr_sample_rate: u32,
    pub asr_language: String,
    pub llm_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_sample_rate: u32,
    pub ws_base_url: String,
    pub llm_base_url: String,
    pub host: String,
    pub port: u16,
    pub min_followup: u32,
    pub max_followup: u32,
    pub pass_threshold: u8,
    pub max_history_turns: usize,
    pub max_concurrent_backend_calls: usize,
    pub tts_flush_timeout: Duration,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(
    name: &'static str,
    default: &str,
) -> Result<T, ConfigError> {
    let value = env_or(name, default);
    value
        .parse()
        .map_err(|_| ConfigError::InvalidVar { name, value })
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// * `DASHSCOPE_API_KEY`: Required. The DashScope API key.
    /// * `ASR_MODEL` / `ASR_SAMPLE_RATE` / `ASR_LANGUAGE`: recognizer settings.
    /// * `LLM_MODEL`: chat and evaluation model.
    /// * `TTS_MODEL` / `TTS_VOICE` / `TTS_SAMPLE_RATE`: synthesizer settings.
    /// * `WS_BASE_URL` / `LLM_BASE_URL`: DashScope endpoints.
    /// * `HOST` / `PORT`: listen address.
    /// * `MIN_FOLLOWUP_QUESTIONS` / `MAX_FOLLOWUP_QUESTIONS` /
    ///   `PASS_SCORE_THRESHOLD`: interview decision parameters.
    /// * `MAX_HISTORY_TURNS`: conversation window size.
    /// * `MAX_CONCURRENT_BACKEND_CALLS`: process-wide backend call bound.
    /// * `TTS_FLUSH_TIMEOUT_SECS`: shutdown bound for synthesizer drain.
    /// * `RUST_LOG`: Optional logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_key = env::var("DASHSCOPE_API_KEY")
            .map_err(|_| ConfigError::MissingVar("DASHSCOPE_API_KEY"))?
            .into();

        let log_level_str = env_or("RUST_LOG", "INFO");
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            api_key,
            asr_model: env_or("ASR_MODEL", "qwen3-asr-flash-realtime"),
            asr_sample_rate: env_parse("ASR_SAMPLE_RATE", "16000")?,
            asr_language: env_or("ASR_LANGUAGE", "zh"),
            llm_model: env_or("LLM_MODEL", "qwen-plus"),
            tts_model: env_or("TTS_MODEL", "qwen3-tts-flash-realtime"),
            tts_voice: env_or("TTS_VOICE", "Maia"),
            tts_sample_rate: env_parse("TTS_SAMPLE_RATE", "24000")?,
            ws_base_url: env_or(
                "WS_BASE_URL",
                "wss://dashscope.aliyuncs.com/api-ws/v1/realtime",
            ),
            llm_base_url: env_or(
                "LLM_BASE_URL",
                "https://dashscope.aliyuncs.com/compatible-mode/v1",
            ),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", "8000")?,
            min_followup: env_parse("MIN_FOLLOWUP_QUESTIONS", "3")?,
            max_followup: env_parse("MAX_FOLLOWUP_QUESTIONS", "5")?,
            pass_threshold: env_parse("PASS_SCORE_THRESHOLD", "70")?,
            max_history_turns: env_parse("MAX_HISTORY_TURNS", "20")?,
            max_concurrent_backend_calls: env_parse("MAX_CONCURRENT_BACKEND_CALLS", "10")?,
            tts_flush_timeout: Duration::from_secs(env_parse("TTS_FLUSH_TIMEOUT_SECS", "10")?),
            log_level,
        })
    }
}
