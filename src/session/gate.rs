use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::events::SessionObserver;
use crate::audio::output::lock;
use crate::audio::{AmplitudeLevel, PlaybackListener};

#[derive(Debug, Default)]
struct GateInputs {
    remote_turn: bool,
    playing: bool,
}

/// Half-duplex turn-taking gate
///
/// Closed while the remote model holds the turn or its audio is still
/// playing. The capture path only ever does an atomic load; writers
/// recompute under the mutex so `on_speaking_change` fires exactly once per
/// transition and in the order transitions happened.
pub struct TurnGate {
    closed: AtomicBool,
    inputs: Mutex<GateInputs>,
    observer: Arc<dyn SessionObserver>,
}

impl TurnGate {
    pub fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            inputs: Mutex::new(GateInputs::default()),
            observer,
        }
    }

    /// Whether local audio may be sent right now
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// The model is speaking (remote turn or audible playback)
    pub fn is_speaking(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn set_remote_turn(&self, active: bool) {
        self.update(|inputs| inputs.remote_turn = active);
    }

    pub fn set_playing(&self, playing: bool) {
        self.update(|inputs| inputs.playing = playing);
    }

    fn update(&self, apply: impl FnOnce(&mut GateInputs)) {
        let mut inputs = lock(&self.inputs);
        apply(&mut inputs);

        let speaking = inputs.remote_turn || inputs.playing;
        if speaking != self.closed.load(Ordering::Acquire) {
            self.closed.store(speaking, Ordering::Release);
            self.observer.on_speaking_change(speaking);
        }
    }
}

impl PlaybackListener for TurnGate {
    fn on_playing_change(&self, playing: bool) {
        self.set_playing(playing);
    }

    fn on_output_level(&self, level: AmplitudeLevel) {
        self.observer.on_output_level(level);
    }
}
