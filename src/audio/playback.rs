//! Gap-free sequential playback of model audio
//!
//! Fragments are scheduled back to back against the output device's clock:
//! each one starts where the previous one ends, or "now" if nothing is
//! queued. The scheduler tracks whether anything is still audible and
//! reports the playhead's loudness.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::level::{amplitude_level_i16, AmplitudeLevel};
use super::output::{fragment_duration, lock, OutputDevice};

/// Samples around the playhead used for the output level
const LEVEL_WINDOW: usize = 1024;

/// Receives playback state changes
pub trait PlaybackListener: Send + Sync {
    /// `true` when the first fragment is queued, `false` once the queue has
    /// drained or been interrupted
    fn on_playing_change(&self, playing: bool);

    fn on_output_level(&self, level: AmplitudeLevel);
}

#[derive(Debug, Clone)]
struct ScheduledFragment {
    samples: Arc<[i16]>,
    start: Duration,
    end: Duration,
}

#[derive(Debug, Default)]
struct PlaybackState {
    queue: VecDeque<ScheduledFragment>,
    next_start: Duration,
    playing: bool,
    level: AmplitudeLevel,
    fragments_played: u64,
}

pub struct PlaybackScheduler {
    device: Arc<dyn OutputDevice>,
    sample_rate: u32,
    listener: Arc<dyn PlaybackListener>,
    state: Mutex<PlaybackState>,
}

impl PlaybackScheduler {
    pub fn new(
        device: Arc<dyn OutputDevice>,
        sample_rate: u32,
        listener: Arc<dyn PlaybackListener>,
    ) -> Self {
        Self {
            device,
            sample_rate,
            listener,
            state: Mutex::new(PlaybackState::default()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Queue one fragment behind everything already scheduled
    ///
    /// Returns the scheduled start position.
    pub fn enqueue(&self, samples: Vec<i16>) -> Duration {
        if samples.is_empty() {
            return lock(&self.state).next_start;
        }

        let samples: Arc<[i16]> = samples.into();
        let now = self.device.now();

        let mut state = lock(&self.state);
        Self::retire_finished(&mut state, now);

        let start = state.next_start.max(now);
        let end = start + fragment_duration(samples.len(), self.sample_rate);

        self.device.schedule(Arc::clone(&samples), self.sample_rate, start);
        state.queue.push_back(ScheduledFragment { samples, start, end });
        state.next_start = end;

        debug!(
            "Scheduled fragment {:?}..{:?} ({} queued)",
            start,
            end,
            state.queue.len()
        );

        if !state.playing {
            state.playing = true;
            self.listener.on_playing_change(true);
        }

        start
    }

    /// Advance bookkeeping to the device clock
    ///
    /// Retires finished fragments, publishes the playhead level, and flips
    /// `playing` off once the queue has drained.
    pub fn tick(&self) {
        let now = self.device.now();
        let mut state = lock(&self.state);
        Self::retire_finished(&mut state, now);

        let level = state
            .queue
            .front()
            .filter(|fragment| fragment.start <= now)
            .map(|fragment| self.level_at(fragment, now))
            .unwrap_or(0.0);

        if state.playing || state.level != level {
            state.level = level;
            self.listener.on_output_level(level);
        }

        if state.playing && state.queue.is_empty() {
            state.playing = false;
            self.listener.on_playing_change(false);
        }
    }

    /// Stop immediately and forget everything queued
    ///
    /// `playing` goes false before this returns.
    pub fn interrupt(&self) {
        let now = self.device.now();
        let mut state = lock(&self.state);

        let discarded = state.queue.len();
        state.queue.clear();
        state.next_start = now;
        self.device.flush();

        if discarded > 0 {
            debug!("Playback interrupted, {} fragment(s) discarded", discarded);
        }

        if state.level != 0.0 {
            state.level = 0.0;
            self.listener.on_output_level(0.0);
        }

        if state.playing {
            state.playing = false;
            self.listener.on_playing_change(false);
        }
    }

    /// True while any fragment is queued or playing
    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    pub fn queued_fragments(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn fragments_played(&self) -> u64 {
        lock(&self.state).fragments_played
    }

    pub fn output_level(&self) -> AmplitudeLevel {
        lock(&self.state).level
    }

    fn retire_finished(state: &mut PlaybackState, now: Duration) {
        while let Some(front) = state.queue.front() {
            if front.end <= now {
                state.queue.pop_front();
                state.fragments_played += 1;
            } else {
                break;
            }
        }
    }

    fn level_at(&self, fragment: &ScheduledFragment, now: Duration) -> AmplitudeLevel {
        let offset = (now - fragment.start).as_nanos() * self.sample_rate as u128 / 1_000_000_000;
        let offset = (offset as usize).min(fragment.samples.len());
        let end = (offset + LEVEL_WINDOW).min(fragment.samples.len());
        amplitude_level_i16(&fragment.samples[offset..end])
    }
}
