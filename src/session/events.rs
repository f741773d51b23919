use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::AmplitudeLevel;
use crate::error::SessionError;
use crate::protocol::ConnectionStatus;

/// Named handlers for everything a live session reports
///
/// Handlers run on whichever task produced the event and must not block or
/// call back into the session. Each kind of event is delivered in the order
/// it happened.
pub trait SessionObserver: Send + Sync {
    fn on_transcript(&self, _text: &str) {}

    fn on_status_change(&self, _status: ConnectionStatus) {}

    fn on_setup_complete(&self) {}

    fn on_speaking_change(&self, _speaking: bool) {}

    fn on_output_level(&self, _level: AmplitudeLevel) {}

    fn on_input_level(&self, _level: AmplitudeLevel) {}

    fn on_error(&self, _error: &SessionError) {}
}

/// Ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// An observer callback as a value
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Transcript(String),
    Status(ConnectionStatus),
    SetupComplete,
    Speaking(bool),
    OutputLevel(AmplitudeLevel),
    InputLevel(AmplitudeLevel),
    Error(SessionError),
}

/// Forwards every callback over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SessionEvent) {
        // Subscriber gone: nothing left to tell
        let _ = self.tx.send(event);
    }
}

impl SessionObserver for ChannelObserver {
    fn on_transcript(&self, text: &str) {
        self.emit(SessionEvent::Transcript(text.to_string()));
    }

    fn on_status_change(&self, status: ConnectionStatus) {
        self.emit(SessionEvent::Status(status));
    }

    fn on_setup_complete(&self) {
        self.emit(SessionEvent::SetupComplete);
    }

    fn on_speaking_change(&self, speaking: bool) {
        self.emit(SessionEvent::Speaking(speaking));
    }

    fn on_output_level(&self, level: AmplitudeLevel) {
        self.emit(SessionEvent::OutputLevel(level));
    }

    fn on_input_level(&self, level: AmplitudeLevel) {
        self.emit(SessionEvent::InputLevel(level));
    }

    fn on_error(&self, error: &SessionError) {
        self.emit(SessionEvent::Error(error.clone()));
    }
}

/// Logs session events; levels only at debug
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_transcript(&self, text: &str) {
        info!("Model: {}", text);
    }

    fn on_status_change(&self, status: ConnectionStatus) {
        info!(%status, "Connection status changed");
    }

    fn on_setup_complete(&self) {
        info!("Setup acknowledged by remote model");
    }

    fn on_speaking_change(&self, speaking: bool) {
        if speaking {
            info!("Model speaking, microphone gated");
        } else {
            info!("Model idle, microphone open");
        }
    }

    fn on_output_level(&self, level: AmplitudeLevel) {
        debug!(level, "Output level");
    }

    fn on_input_level(&self, level: AmplitudeLevel) {
        debug!(level, "Input level");
    }

    fn on_error(&self, error: &SessionError) {
        warn!("Session error: {}", error);
    }
}

/// Delivers each callback to several observers in registration order
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<std::sync::Arc<dyn SessionObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: std::sync::Arc<dyn SessionObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl SessionObserver for ObserverSet {
    fn on_transcript(&self, text: &str) {
        self.observers.iter().for_each(|o| o.on_transcript(text));
    }

    fn on_status_change(&self, status: ConnectionStatus) {
        self.observers.iter().for_each(|o| o.on_status_change(status));
    }

    fn on_setup_complete(&self) {
        self.observers.iter().for_each(|o| o.on_setup_complete());
    }

    fn on_speaking_change(&self, speaking: bool) {
        self.observers.iter().for_each(|o| o.on_speaking_change(speaking));
    }

    fn on_output_level(&self, level: AmplitudeLevel) {
        self.observers.iter().for_each(|o| o.on_output_level(level));
    }

    fn on_input_level(&self, level: AmplitudeLevel) {
        self.observers.iter().for_each(|o| o.on_input_level(level));
    }

    fn on_error(&self, error: &SessionError) {
        self.observers.iter().for_each(|o| o.on_error(error));
    }
}
