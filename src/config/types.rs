use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub frames: FramesConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    /// API key; falls back to the OPENAI_API_KEY environment variable.
    /// When neither is present, the extract/script/narration stages are
    /// disabled rather than erroring at startup.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Vision-capable chat model used for script generation.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Speech synthesis model.
    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    /// Speech synthesis voice.
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Timeout for the streaming script generation call, in seconds.
    #[serde(default = "default_script_timeout")]
    pub script_timeout_secs: u64,

    /// Timeout for the speech synthesis call, in seconds.
    #[serde(default = "default_speech_timeout")]
    pub speech_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FramesConfig {
    /// Every Nth extracted frame is sent to the vision model.
    #[serde(default = "default_stride")]
    pub sample_stride: usize,

    /// Explicit path to the ffmpeg binary; discovered on PATH otherwise.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Maximum number of decoded videos kept in the extraction cache.
    #[serde(default = "default_cache_entries")]
    pub cache_max_entries: usize,

    /// Seconds a cached extraction stays valid.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionsConfig {
    /// Seconds of inactivity before a session is expired.
    #[serde(default = "default_session_expiry")]
    pub expiry_secs: u64,

    /// How often the expiry sweep runs, in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_api_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o".to_string()
}

fn default_speech_model() -> String {
    "tts-1".to_string()
}

fn default_voice() -> String {
    "fable".to_string()
}

fn default_script_timeout() -> u64 {
    300
}

fn default_speech_timeout() -> u64 {
    120
}

fn default_stride() -> usize {
    50
}

fn default_cache_entries() -> usize {
    16
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_session_expiry() -> u64 {
    3600
}

fn default_cleanup_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            vision_model: default_vision_model(),
            speech_model: default_speech_model(),
            voice: default_voice(),
            script_timeout_secs: default_script_timeout(),
            speech_timeout_secs: default_speech_timeout(),
        }
    }
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            sample_stride: default_stride(),
            ffmpeg_path: None,
            cache_max_entries: default_cache_entries(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            expiry_secs: default_session_expiry(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}
