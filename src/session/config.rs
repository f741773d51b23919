use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::WireDialect;

/// What to do when an established connection drops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Reconnect attempts after a drop (0 = never)
    pub max_attempts: u32,

    /// Pause before each attempt
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Connection-level settings for the session protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Model id sent in the setup message
    pub model: String,

    pub dialect: WireDialect,

    /// How long to wait for the setup acknowledgement
    pub handshake_timeout: Duration,

    pub reconnect: ReconnectPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.0-flash-exp".to_string(),
            dialect: WireDialect::Generic,
            handshake_timeout: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Configuration for a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capture rate expected by the model (16kHz)
    pub sample_rate: u32,

    /// Samples per transmitted frame
    /// Default: 4096 (~256ms at 16kHz)
    pub frame_size: usize,

    /// Frames buffered between capture and transmitter before dropping
    pub capture_queue_depth: usize,

    /// Rate of the audio the model sends back
    pub output_sample_rate: u32,

    /// Replay file input at wall-clock pace
    pub realtime_input: bool,

    /// How often playback bookkeeping runs (level updates, drain detection)
    pub playback_tick: Duration,

    pub protocol: ProtocolConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 4096,
            capture_queue_depth: 2,
            output_sample_rate: 24000,
            realtime_input: true,
            playback_tick: Duration::from_millis(50),
            protocol: ProtocolConfig::default(),
        }
    }
}
