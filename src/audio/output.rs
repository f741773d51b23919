use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Audio output device driven by its own clock
///
/// The playback scheduler decides *when* each fragment starts; the device
/// only has to honour that position and report how far it has played.
pub trait OutputDevice: Send + Sync {
    /// Current position of the device's playback clock
    fn now(&self) -> Duration;

    /// Queue `samples` (mono, `sample_rate`) to start at clock position `start`
    fn schedule(&self, samples: Arc<[i16]>, sample_rate: u32, start: Duration);

    /// Discard everything that has not played yet
    fn flush(&self);

    /// Release the device. Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// A window handed to a [`VirtualOutput`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledWindow {
    pub start: Duration,
    pub end: Duration,
    pub samples: usize,
}

enum Clock {
    Manual(Mutex<Duration>),
    Realtime(Instant),
}

/// Output device without hardware
///
/// Used for headless runs (realtime clock) and tests (manual clock). Every
/// scheduled window is recorded for inspection.
pub struct VirtualOutput {
    clock: Clock,
    windows: Mutex<Vec<ScheduledWindow>>,
    flushes: AtomicUsize,
    closes: AtomicUsize,
    open: AtomicBool,
}

impl VirtualOutput {
    /// Clock that only moves when [`advance`](Self::advance) is called
    pub fn manual() -> Self {
        Self::with_clock(Clock::Manual(Mutex::new(Duration::ZERO)))
    }

    /// Clock that follows wall time from creation
    pub fn realtime() -> Self {
        Self::with_clock(Clock::Realtime(Instant::now()))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            windows: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            open: AtomicBool::new(true),
        }
    }

    /// Move a manual clock forward. No effect on a realtime clock.
    pub fn advance(&self, by: Duration) {
        if let Clock::Manual(now) = &self.clock {
            *lock(now) += by;
        }
    }

    pub fn windows(&self) -> Vec<ScheduledWindow> {
        lock(&self.windows).clone()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Number of times the device was actually released
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl OutputDevice for VirtualOutput {
    fn now(&self) -> Duration {
        match &self.clock {
            Clock::Manual(now) => *lock(now),
            Clock::Realtime(origin) => origin.elapsed(),
        }
    }

    fn schedule(&self, samples: Arc<[i16]>, sample_rate: u32, start: Duration) {
        let end = start + fragment_duration(samples.len(), sample_rate);
        lock(&self.windows).push(ScheduledWindow {
            start,
            end,
            samples: samples.len(),
        });
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "virtual"
    }
}

/// Play time of `samples` mono samples at `sample_rate`
pub fn fragment_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(samples as u64 * 1_000_000_000 / sample_rate as u64)
}

/// Silent frames to insert before a fragment starting at `start`
///
/// `tail_end` is the scheduled end of the audio still buffered on the
/// device, or `None` when the buffer has drained. Positions are compared in
/// time rather than in frames, so per-fragment resampling round-off never
/// turns back-to-back fragments into a gap.
pub fn lead_in_frames(start: Duration, tail_end: Option<Duration>, device_rate: u32) -> usize {
    match tail_end {
        Some(end) if start > end => {
            ((start - end).as_nanos() * device_rate as u128 / 1_000_000_000) as usize
        }
        _ => 0,
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
