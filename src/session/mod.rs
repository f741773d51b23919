//! Live session management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - Audio capture and framing from microphone or file
//! - Turn-taking between the user and the remote model
//! - The connection lifecycle to the remote model
//! - Gap-free playback of model audio
//! - Session statistics and observer callbacks

mod config;
mod controller;
mod events;
mod gate;
mod protocol;
mod stats;
mod transmitter;

pub use config::{ProtocolConfig, ReconnectPolicy, SessionConfig};
pub use controller::SessionController;
pub use events::{ChannelObserver, LoggingObserver, NoopObserver, ObserverSet, SessionEvent, SessionObserver};
pub use gate::TurnGate;
pub use protocol::{ProtocolSinks, SessionProtocol};
pub use stats::{SessionCounters, SessionStats};
pub use transmitter::{ChunkTransmitter, MediaSink, TransmitOutcome};
