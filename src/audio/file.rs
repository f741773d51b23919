use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig};
use super::convert::{downmix_to_mono, i16_to_f32, resample_linear};
use super::framer::SampleFramer;

/// Samples handed to the framer per simulated capture callback
const FILE_CALLBACK_SAMPLES: usize = 1024;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

        let spec = reader.spec();
        let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .map(|s| s.map(super::convert::f32_to_i16))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (format, bits) => bail!("Unsupported WAV encoding: {:?} {}-bit", format, bits),
        };

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Normalized mono samples at `target_rate`
    pub fn to_mono(&self, target_rate: u32) -> Vec<f32> {
        let floats: Vec<f32> = self.samples.iter().map(|s| i16_to_f32(*s)).collect();
        let mono = downmix_to_mono(&floats, self.channels as usize);
        resample_linear(&mono, self.sample_rate, target_rate)
    }
}

/// Replays a WAV file as if it were a microphone
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    samples: Vec<f32>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Result<Self> {
        let path = path.into();
        let audio = AudioFile::open(&path)?;
        let samples = audio.to_mono(config.target_sample_rate);

        Ok(Self {
            path,
            config,
            samples,
            task: None,
        })
    }

    /// Samples this backend will feed, after conversion
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self, mut framer: SampleFramer) -> Result<()> {
        if self.task.is_some() {
            bail!("Already capturing");
        }

        let samples = self.samples.clone();
        let realtime = self.config.realtime;
        let rate = self.config.target_sample_rate.max(1);
        let path = self.path.display().to_string();

        info!("Starting file capture from {} (realtime={})", path, realtime);

        let task = tokio::spawn(async move {
            let tick = Duration::from_micros(FILE_CALLBACK_SAMPLES as u64 * 1_000_000 / rate as u64);
            let mut interval = tokio::time::interval(tick);

            for block in samples.chunks(FILE_CALLBACK_SAMPLES) {
                if realtime {
                    interval.tick().await;
                } else {
                    tokio::task::yield_now().await;
                }

                framer.push(block);

                if framer.is_closed() {
                    break;
                }
            }

            debug!("File capture finished: {}", path);
        });

        self.task = Some(task);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            info!("Stopping file capture: {}", self.path.display());
            task.abort();
            // Cancellation is the expected outcome here
            let _ = task.await;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
