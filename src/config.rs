use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{AudioSource, OutputKind};
use crate::persona::{Persona, PersonaCatalog};
use crate::protocol::WireDialect;
use crate::session::{ProtocolConfig, ReconnectPolicy, SessionConfig};

/// Prefix for environment overrides, e.g. `LOQA_LIVE__MODEL__ENDPOINT`
pub const ENV_PREFIX: &str = "LOQA_LIVE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub model: ModelConfig,
    pub personas: Vec<Persona>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-live".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    #[default]
    Microphone,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub output_sample_rate: u32,
    pub capture_queue_depth: usize,
    pub source: CaptureSource,
    /// WAV file used when `source = "file"`
    pub input_file: Option<PathBuf>,
    pub output: OutputKind,
    /// Pace file input at real time
    pub realtime: bool,
    pub playback_tick_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 4096,
            output_sample_rate: 24000,
            capture_queue_depth: 2,
            source: CaptureSource::Microphone,
            input_file: None,
            output: OutputKind::Speaker,
            realtime: true,
            playback_tick_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// WebSocket endpoint of the model
    pub endpoint: String,
    /// Environment variable holding the API key (never stored in the file)
    pub api_key_env: String,
    pub model: String,
    pub dialect: WireDialect,
    pub handshake_timeout_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    pub outbound_queue_depth: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            model: "models/gemini-2.0-flash-exp".to_string(),
            dialect: WireDialect::Gemini,
            handshake_timeout_secs: 15,
            reconnect_attempts: 0,
            reconnect_backoff_ms: 1000,
            outbound_queue_depth: 16,
        }
    }
}

impl Config {
    /// Load `path` (extension optional, file optional) then apply
    /// `LOQA_LIVE__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            sample_rate: self.audio.sample_rate,
            frame_size: self.audio.frame_size,
            capture_queue_depth: self.audio.capture_queue_depth,
            output_sample_rate: self.audio.output_sample_rate,
            realtime_input: self.audio.realtime,
            playback_tick: Duration::from_millis(self.audio.playback_tick_ms),
            protocol: ProtocolConfig {
                model: self.model.model.clone(),
                dialect: self.model.dialect,
                handshake_timeout: Duration::from_secs(self.model.handshake_timeout_secs),
                reconnect: ReconnectPolicy {
                    max_attempts: self.model.reconnect_attempts,
                    backoff: Duration::from_millis(self.model.reconnect_backoff_ms),
                },
            },
        }
    }

    /// Capture source, with `input` overriding the configured one
    pub fn audio_source(&self, input: Option<PathBuf>) -> Result<AudioSource> {
        if let Some(path) = input {
            return Ok(AudioSource::File(path));
        }

        match self.audio.source {
            CaptureSource::Microphone => Ok(AudioSource::Microphone),
            CaptureSource::File => match &self.audio.input_file {
                Some(path) => Ok(AudioSource::File(path.clone())),
                None => bail!("audio.source is \"file\" but audio.input_file is not set"),
            },
        }
    }

    /// API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.model.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }

    pub fn persona_catalog(&self) -> PersonaCatalog {
        PersonaCatalog::new(self.personas.clone())
    }
}
