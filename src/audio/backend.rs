use anyhow::Result;
use std::path::PathBuf;

use super::framer::SampleFramer;
use super::level::AmplitudeLevel;

/// One fixed-size block of captured audio (16-bit PCM, mono)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Position of this frame in the capture stream (0-indexed)
    pub sequence: u64,
}

/// A frame together with its loudness, as produced by the [`SampleFramer`]
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: AudioFrame,
    pub level: AmplitudeLevel,
}

/// Configuration for audio capture
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Samples per emitted frame
    pub frame_size: usize,
    /// Frames buffered between the capture callback and the transmitter
    /// before new frames are dropped
    pub queue_depth: usize,
    /// Feed file input at wall-clock pace instead of as fast as possible
    pub realtime: bool,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // Model input rate
            frame_size: 4096,          // ~256ms at 16kHz
            queue_depth: 2,
            realtime: true,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal default input device (feature `device`)
/// - File: WAV file replayed through the framer (for testing/headless runs)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Raw samples are pushed into `framer`, which emits frames on its channel.
    /// The capture path never blocks on the consumer.
    async fn start(&mut self, framer: SampleFramer) -> Result<()>;

    /// Stop capturing audio and release the device. Safe to call repeatedly.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for the given source
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "device")]
                {
                    let backend = super::device::MicrophoneBackend::new(config)?;
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "device"))]
                {
                    let _ = config;
                    anyhow::bail!("Microphone capture requires building with the `device` feature")
                }
            }

            AudioSource::File(path) => {
                let backend = super::file::FileBackend::open(path, config)?;
                Ok(Box::new(backend))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone input (default input device)
    Microphone,
    /// File input (for testing/batch processing)
    File(PathBuf),
}

/// Where model audio is played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Default output device (feature `device`)
    #[default]
    Speaker,
    /// Discard audio on a wall-clock timeline (headless runs)
    Virtual,
}

/// Acquires the capture and output devices for one session
///
/// Devices are opened per session and released by the session that opened
/// them; nothing here is process-wide.
pub trait AudioDevices: Send + Sync {
    fn open_capture(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>>;

    fn open_output(&self) -> Result<std::sync::Arc<dyn super::output::OutputDevice>>;
}

/// Devices chosen from configuration
#[derive(Debug, Clone)]
pub struct SystemDevices {
    pub source: AudioSource,
    pub output: OutputKind,
}

impl SystemDevices {
    pub fn new(source: AudioSource, output: OutputKind) -> Self {
        Self { source, output }
    }
}

impl AudioDevices for SystemDevices {
    fn open_capture(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        AudioBackendFactory::create(self.source.clone(), config)
    }

    fn open_output(&self) -> Result<std::sync::Arc<dyn super::output::OutputDevice>> {
        match self.output {
            OutputKind::Speaker => {
                #[cfg(feature = "device")]
                {
                    Ok(std::sync::Arc::new(super::device::SpeakerOutput::open()?))
                }

                #[cfg(not(feature = "device"))]
                {
                    anyhow::bail!("Speaker output requires building with the `device` feature")
                }
            }
            OutputKind::Virtual => Ok(std::sync::Arc::new(super::output::VirtualOutput::realtime())),
        }
    }
}
