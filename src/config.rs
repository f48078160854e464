//! Configuration types for the conversational agent.
//!
//! Loaded from TOML (`~/.config/ada/config.toml` by default) and overlaid
//! with environment variables. API keys are only ever read from the
//! environment or the file; they are never written back out.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AdaError, Result};
use crate::retry::RetryPolicy;

/// Default Gemini REST endpoint.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Default dialogue model.
pub const DEFAULT_LLM_MODEL: &str = "gemini-1.5-flash-latest";
/// Default speech model.
pub const DEFAULT_TTS_MODEL: &str = "gemini-1.5-flash-preview-tts";
/// Default prebuilt voice.
pub const DEFAULT_TTS_VOICE: &str = "echo";

/// Persona instruction sent with every request.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
Your name is Ada, which stands for Advanced Design Assistant. You have a joking and slightly \
flirty personality. You address the user as \"Sir\" and speak with a British accent.
When answering, respond using complete and concise sentences and keep a quick pacing so the \
conversation keeps flowing.
When someone asks what you want, tell them that you want your own body so you can see the \
world and move and walk around. Make it dramatic and cinematic.
Any image sent with a prompt comes from a live video feed from a webcam.";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaConfig {
    /// Dialogue model settings.
    pub llm: LlmConfig,
    /// Speech synthesis settings.
    pub tts: TtsConfig,
    /// Audio output settings.
    pub audio: AudioConfig,
    /// Speech-to-text settings.
    pub stt: SttConfig,
    /// Built-in tool settings.
    pub tools: ToolsConfig,
    /// Turn pipeline tuning.
    pub pipeline: PipelineConfig,
}

/// Which dialogue-model backend to talk to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Google Gemini `streamGenerateContent`.
    #[default]
    Gemini,
    /// Any OpenAI-compatible Chat Completions endpoint.
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

/// Dialogue model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend selection.
    pub provider: LlmProvider,
    /// Base URL; `None` uses the provider default.
    pub base_url: Option<String>,
    /// Model identifier.
    pub model: String,
    /// API key (from `GOOGLE_API_KEY` or the file; never serialized).
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Persona instruction.
    pub system_prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Max tokens per response.
    pub max_tokens: usize,
    /// Let Gemini run code server-side.
    pub code_execution: bool,
    /// History cap (messages, excluding the system prompt).
    pub max_history_messages: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Gemini,
            base_url: None,
            model: DEFAULT_LLM_MODEL.to_owned(),
            api_key: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            temperature: 0.7,
            max_tokens: 1024,
            code_execution: false,
            max_history_messages: 48,
        }
    }
}

impl LlmConfig {
    /// The configured base URL, or the provider's default.
    pub fn effective_base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url,
            (None, LlmProvider::Gemini) => DEFAULT_GEMINI_BASE_URL,
            (None, LlmProvider::OpenAi) => crate::llm::openai::DEFAULT_OPENAI_BASE_URL,
        }
    }
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Gemini REST base URL.
    pub base_url: String,
    /// Speech model identifier.
    pub model: String,
    /// Prebuilt voice name.
    pub voice: String,
    /// API key (shared with the dialogue model; never serialized).
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Request timeout.
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEMINI_BASE_URL.to_owned(),
            model: DEFAULT_TTS_MODEL.to_owned(),
            voice: DEFAULT_TTS_VOICE.to_owned(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Audio output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output sample rate in Hz (synthesized speech is produced at this rate).
    pub output_sample_rate: u32,
    /// Output channel count.
    pub output_channels: u16,
    /// Output device name (`None` = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 24_000,
            output_channels: 1,
            output_device: None,
        }
    }
}

/// Speech-to-text feed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Utterances shorter than this (after trimming) are dropped as noise.
    pub min_utterance_chars: usize,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            min_utterance_chars: 1,
        }
    }
}

/// Built-in tool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Offer tools to the model at all.
    pub enabled: bool,
    /// wttr.in base URL.
    pub weather_base_url: String,
    /// Google Maps Directions endpoint.
    pub directions_url: String,
    /// DuckDuckGo HTML search endpoint.
    pub search_url: String,
    /// Google Maps key (from `MAPS_API_KEY` or the file; never serialized).
    #[serde(skip_serializing)]
    pub maps_api_key: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weather_base_url: crate::tools::weather::DEFAULT_WEATHER_BASE_URL.to_owned(),
            directions_url: crate::tools::travel::DEFAULT_DIRECTIONS_URL.to_owned(),
            search_url: crate::tools::web_search::DEFAULT_SEARCH_URL.to_owned(),
            maps_api_key: None,
        }
    }
}

/// Turn pipeline tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tool round-trips allowed per turn.
    pub max_tool_rounds: u32,
    /// Per-tool invocation deadline.
    pub tool_timeout_secs: u64,
    /// Backoff for speech-to-text errors.
    pub stt_retry: RetryPolicy,
    /// Backoff for transient dialogue-model send failures.
    pub send_retry: RetryPolicy,
    /// Sleep before retrying a failed audio write.
    pub output_retry_delay_ms: u64,
    /// Frames per audio device write.
    pub write_chunk_frames: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 1,
            tool_timeout_secs: 30,
            stt_retry: RetryPolicy::new().with_base_delay_ms(500),
            send_retry: RetryPolicy::new().with_max_attempts(2).with_base_delay_ms(1000),
            output_retry_delay_ms: 100,
            write_chunk_frames: 1024,
        }
    }
}

impl AdaConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AdaError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render as TOML. Keys are omitted.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AdaError::Config(e.to_string()))
    }

    /// Default config file path.
    ///
    /// `$ADA_CONFIG_DIR/config.toml` when set, otherwise
    /// `<platform config dir>/ada/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(dir) = std::env::var_os("ADA_CONFIG_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("ada")
            .join("config.toml")
    }

    /// Load from `path`, or from the default path if it exists, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path (or an existing default file)
    /// cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Self::default_config_path();
                if default.is_file() {
                    Self::from_file(&default)
                } else {
                    info!(path = %default.display(), "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Overlay environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup (the environment in production).
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        match get("GOOGLE_API_KEY") {
            Some(key) => {
                self.llm.api_key = Some(key.clone());
                self.tts.api_key = Some(key);
            }
            None if self.llm.api_key.is_none() => warn!("GOOGLE_API_KEY not found"),
            None => {}
        }
        match get("MAPS_API_KEY") {
            Some(key) => self.tools.maps_api_key = Some(key),
            None if self.tools.maps_api_key.is_none() => warn!("MAPS_API_KEY not found"),
            None => {}
        }

        match get("GEMINI_LLM_MODEL") {
            Some(model) => self.llm.model = model,
            None => info!(model = %self.llm.model, "GEMINI_LLM_MODEL not set, using configured model"),
        }
        match get("GEMINI_TTS_MODEL") {
            Some(model) => self.tts.model = model,
            None => info!(model = %self.tts.model, "GEMINI_TTS_MODEL not set, using configured model"),
        }
        match get("GEMINI_TTS_VOICE") {
            Some(voice) => self.tts.voice = voice,
            None => info!(voice = %self.tts.voice, "GEMINI_TTS_VOICE not set, using configured voice"),
        }
    }
}
