use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::convert::{le_bytes_to_samples, samples_to_le_bytes};
use crate::audio::AudioFrame;

/// MIME tag for raw 16-bit little-endian PCM
pub const PCM_MIME_TYPE: &str = "audio/pcm";

/// Connection state as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// A frame ready for the wire: base64 PCM plus its MIME tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: String,
    pub mime_type: String,
}

impl EncodedChunk {
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self::from_samples(&frame.samples)
    }

    pub fn from_samples(samples: &[i16]) -> Self {
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(samples_to_le_bytes(samples)),
            mime_type: PCM_MIME_TYPE.to_string(),
        }
    }

    /// Decode back to PCM samples
    pub fn decode_samples(&self) -> Result<Vec<i16>, base64::DecodeError> {
        decode_pcm(&self.data)
    }
}

/// Base64 little-endian PCM to samples
pub fn decode_pcm(data: &str) -> Result<Vec<i16>, base64::DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
    Ok(le_bytes_to_samples(&bytes))
}

/// What the first message of a connection asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRequest {
    pub model: String,
    /// Persona / system instructions, passed through uninterpreted
    pub system_instructions: String,
}

/// Setup message on the generic wire
#[derive(Debug, Serialize, Deserialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetupPayload {
    pub model: String,
    #[serde(rename = "systemInstructions")]
    pub system_instructions: String,
}

/// Audio message on the generic wire
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioChunkMessage {
    pub chunk: String, // Base64-encoded PCM bytes
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Inbound events, already demultiplexed from whatever dialect the remote speaks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InboundMessage {
    /// Text fragment of the model's reply
    Transcript { text: String },
    /// Base64 PCM at the model's output rate
    AudioFragment { data: String },
    /// Remote turn started or ended
    TurnState { speaking: bool },
    /// Setup acknowledged
    SetupComplete,
    /// Model was cut off; drop any queued speech now
    Interrupted,
    /// Remote reported an error
    Error { message: String },
}
