//! Local microphone and speaker via cpal
//!
//! cpal streams are not Send, so each stream lives on its own thread and is
//! dropped there when the owner signals stop.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig};
use super::convert::{downmix_to_mono, i16_to_f32, resample_linear};
use super::framer::SampleFramer;
use super::output::{fragment_duration, lead_in_frames, lock, OutputDevice};

/// Thread that owns a live cpal stream until told to stop
struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl StreamThread {
    /// Build a stream on a dedicated thread and wait until it is playing
    fn spawn<F>(name: &str, build: F) -> Result<(Self, String)>
    where
        F: FnOnce() -> Result<(Stream, String)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<String, String>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|(stream, label)| {
                    stream.play().context("Failed to start audio stream")?;
                    Ok((stream, label))
                }) {
                    Ok((stream, label)) => {
                        let _ = ready_tx.send(Ok(label));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{:#}", e)));
                        return;
                    }
                };

                // Either an explicit stop or the owner going away ends the stream
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn audio thread")?;

        match ready_rx.recv() {
            Ok(Ok(label)) => Ok((Self { stop_tx, thread }, label)),
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(anyhow!(message))
            }
            Err(_) => {
                let _ = thread.join();
                bail!("Audio thread exited before the stream started")
            }
        }
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            warn!("Audio thread panicked during shutdown");
        }
    }
}

/// Default input device, downmixed and resampled to the target rate
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    worker: Option<StreamThread>,
    device_name: String,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device"))?;
        let device_name = device.name().unwrap_or_else(|_| "Default Input".to_string());

        info!(
            "Microphone backend initialized: {} ({}Hz target)",
            device_name, config.target_sample_rate
        );

        Ok(Self {
            config,
            worker: None,
            device_name,
        })
    }

    fn build_input_stream(mut framer: SampleFramer, target_rate: u32) -> Result<(Stream, String)> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device"))?;
        let label = device.name().unwrap_or_else(|_| "Default Input".to_string());

        let supported = device
            .default_input_config()
            .context("Failed to query input config")?;
        let source_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let stream_config: StreamConfig = supported.config();

        info!(
            "Opening input device {} ({}Hz, {} channels, {:?})",
            label,
            source_rate,
            channels,
            supported.sample_format()
        );

        let err_fn = |err| warn!("Input stream error: {}", err);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix_to_mono(data, channels);
                    framer.push(&resample_linear(&mono, source_rate, target_rate));
                },
                err_fn,
                None,
            )?,
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data.iter().map(|s| i16_to_f32(*s)).collect();
                    let mono = downmix_to_mono(&floats, channels);
                    framer.push(&resample_linear(&mono, source_rate, target_rate));
                },
                err_fn,
                None,
            )?,
            other => bail!("Unsupported input sample format: {:?}", other),
        };

        Ok((stream, label))
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self, framer: SampleFramer) -> Result<()> {
        if self.worker.is_some() {
            bail!("Already capturing");
        }

        let target_rate = self.config.target_sample_rate;
        let (worker, label) = tokio::task::spawn_blocking(move || {
            StreamThread::spawn("loqa-capture", move || {
                Self::build_input_stream(framer, target_rate)
            })
        })
        .await
        .context("Capture thread setup panicked")??;

        info!("Microphone capture started: {}", label);
        self.device_name = label;
        self.worker = Some(worker);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            info!("Stopping microphone capture: {}", self.device_name);
            tokio::task::spawn_blocking(move || worker.stop())
                .await
                .context("Capture thread shutdown panicked")?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

#[derive(Default)]
struct SpeakerQueue {
    samples: VecDeque<f32>,
    /// Scheduled end of the last fragment appended
    tail_end: Option<Duration>,
}

struct SpeakerShared {
    buffer: Mutex<SpeakerQueue>,
    played_frames: AtomicU64,
    device_rate: u32,
}

/// Default output device fed from a sample ring
///
/// The clock is the number of frames the device callback has consumed,
/// so scheduled positions stay in step with what is actually audible.
pub struct SpeakerOutput {
    shared: Arc<SpeakerShared>,
    worker: Mutex<Option<StreamThread>>,
    open: AtomicBool,
    device_name: String,
}

impl SpeakerOutput {
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"))?;
        let supported = device
            .default_output_config()
            .context("Failed to query output config")?;
        let device_rate = supported.sample_rate().0;

        let shared = Arc::new(SpeakerShared {
            buffer: Mutex::new(SpeakerQueue::default()),
            played_frames: AtomicU64::new(0),
            device_rate,
        });

        let stream_shared = Arc::clone(&shared);
        let (worker, label) = StreamThread::spawn("loqa-playback", move || {
            Self::build_output_stream(stream_shared)
        })?;

        info!("Speaker output opened: {} ({}Hz)", label, device_rate);

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            open: AtomicBool::new(true),
            device_name: label,
        })
    }

    fn build_output_stream(shared: Arc<SpeakerShared>) -> Result<(Stream, String)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"))?;
        let label = device.name().unwrap_or_else(|_| "Default Output".to_string());
        let supported = device
            .default_output_config()
            .context("Failed to query output config")?;
        let channels = supported.channels() as usize;
        let stream_config: StreamConfig = supported.config();
        let err_fn = |err| warn!("Output stream error: {}", err);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    Self::fill(&shared, data, channels, |s| s);
                },
                err_fn,
                None,
            )?,
            SampleFormat::I16 => device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    Self::fill(&shared, data, channels, super::convert::f32_to_i16);
                },
                err_fn,
                None,
            )?,
            other => bail!("Unsupported output sample format: {:?}", other),
        };

        Ok((stream, label))
    }

    fn fill<T: Copy>(shared: &SpeakerShared, data: &mut [T], channels: usize, convert: impl Fn(f32) -> T) {
        let channels = channels.max(1);
        let mut buffer = lock(&shared.buffer);
        for frame in data.chunks_mut(channels) {
            let value = convert(buffer.samples.pop_front().unwrap_or(0.0));
            for slot in frame.iter_mut() {
                *slot = value;
            }
        }
        shared
            .played_frames
            .fetch_add((data.len() / channels) as u64, Ordering::Relaxed);
    }
}

impl OutputDevice for SpeakerOutput {
    fn now(&self) -> Duration {
        let frames = self.shared.played_frames.load(Ordering::Relaxed);
        Duration::from_nanos(frames * 1_000_000_000 / self.shared.device_rate.max(1) as u64)
    }

    fn schedule(&self, samples: Arc<[i16]>, sample_rate: u32, start: Duration) {
        let floats: Vec<f32> = samples.iter().map(|s| i16_to_f32(*s)).collect();
        let resampled = resample_linear(&floats, sample_rate, self.shared.device_rate);

        let mut buffer = lock(&self.shared.buffer);
        let tail_end = if buffer.samples.is_empty() { None } else { buffer.tail_end };
        let gap = lead_in_frames(start, tail_end, self.shared.device_rate);
        buffer.samples.extend(std::iter::repeat(0.0).take(gap));
        buffer.samples.extend(resampled);
        buffer.tail_end = Some(start + fragment_duration(samples.len(), sample_rate));
    }

    fn flush(&self) {
        let mut buffer = lock(&self.shared.buffer);
        buffer.samples.clear();
        buffer.tail_end = None;
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = lock(&self.worker).take() {
            info!("Closing speaker output: {}", self.device_name);
            worker.stop();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.close();
    }
}
