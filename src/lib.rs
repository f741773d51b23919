pub mod audio;
pub mod config;
pub mod error;
pub mod history;
pub mod http;
pub mod persona;
pub mod protocol;
pub mod session;
pub mod transcription;

pub use audio::{
    base64_pcm_to_wav, pcm_to_wav, AudioBackend, AudioBackendConfig, AudioBackendFactory,
    AudioDevices, AudioFile, AudioFrame, AudioSource, FileBackend, OutputDevice, OutputKind,
    PlaybackScheduler, SampleFramer, SystemDevices, VirtualOutput,
};
pub use config::Config;
pub use error::SessionError;
pub use history::{ChatHistory, ChatMessage, Role};
pub use http::{create_router, AppState};
pub use persona::{Persona, PersonaCatalog};
pub use protocol::{
    ChannelTransport, ConnectionStatus, EncodedChunk, InboundMessage, Transport, WebSocketTransport,
    WireDialect,
};
pub use session::{
    ChannelObserver, LoggingObserver, SessionConfig, SessionController, SessionEvent,
    SessionObserver, SessionProtocol, SessionStats,
};
pub use transcription::{DisabledTranscriber, Transcriber, TranscriptionError};
