use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

use super::backend::{AudioFrame, CapturedFrame};
use super::convert::f32_to_i16;
use super::level::amplitude_level_i16;

/// Counters updated from the capture callback
#[derive(Debug, Default)]
pub struct CaptureCounters {
    /// Frames handed to the consumer
    pub frames: AtomicU64,
    /// Frames discarded because the consumer was behind
    pub dropped: AtomicU64,
}

/// Turns a continuous float sample stream into fixed-size PCM frames
///
/// Runs inside the capture callback. Frames are offered to the consumer with
/// `try_send`; when the queue is full the frame is dropped rather than
/// queued, so capture latency never grows.
pub struct SampleFramer {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<i16>,
    sequence: u64,
    tx: mpsc::Sender<CapturedFrame>,
    counters: Arc<CaptureCounters>,
}

impl SampleFramer {
    pub fn new(
        frame_size: usize,
        sample_rate: u32,
        tx: mpsc::Sender<CapturedFrame>,
        counters: Arc<CaptureCounters>,
    ) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size * 2),
            sequence: 0,
            tx,
            counters,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Push mono samples at the framer's sample rate
    ///
    /// Returns the number of complete frames produced by this call,
    /// whether or not the consumer accepted them.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        self.pending.extend(samples.iter().map(|s| f32_to_i16(*s)));

        let mut produced = 0;
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let samples = std::mem::replace(&mut self.pending, rest);
            self.emit(samples);
            produced += 1;
        }

        produced
    }

    fn emit(&mut self, samples: Vec<i16>) {
        let sequence = self.sequence;
        self.sequence += 1;

        let timestamp_ms = sequence * self.frame_size as u64 * 1000 / self.sample_rate.max(1) as u64;
        let level = amplitude_level_i16(&samples);
        let captured = CapturedFrame {
            frame: AudioFrame {
                samples,
                sample_rate: self.sample_rate,
                channels: 1,
                timestamp_ms,
                sequence,
            },
            level,
        };

        match self.tx.try_send(captured) {
            Ok(()) => {
                self.counters.frames.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!("Capture queue full, dropped frame {} ({} total)", sequence, dropped);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Capture consumer closed, discarding frame {}", sequence);
            }
        }
    }
}
