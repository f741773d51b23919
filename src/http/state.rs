use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::audio::output::lock;
use crate::audio::AudioDevices;
use crate::error::SessionError;
use crate::history::{ChatHistory, Role};
use crate::persona::PersonaCatalog;
use crate::protocol::{ConnectionStatus, Transport};
use crate::session::{LoggingObserver, ObserverSet, SessionConfig, SessionController, SessionObserver};
use crate::transcription::{DisabledTranscriber, Transcriber};

/// What the HTTP layer knows about the live session, fed by its callbacks
#[derive(Debug)]
pub struct LiveState {
    history: ChatHistory,
    conversation_id: Mutex<Option<String>>,
    status: Mutex<ConnectionStatus>,
    speaking: AtomicBool,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub conversation_id: Option<String>,
    pub status: ConnectionStatus,
    pub speaking: bool,
    pub last_error: Option<String>,
}

impl LiveState {
    pub fn new(history: ChatHistory) -> Self {
        Self {
            history,
            conversation_id: Mutex::new(None),
            status: Mutex::new(ConnectionStatus::Disconnected),
            speaking: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Route transcripts of the next session to `conversation_id`
    pub fn begin(&self, conversation_id: String) {
        *lock(&self.conversation_id) = Some(conversation_id);
        *lock(&self.last_error) = None;
    }

    pub fn end(&self) {
        *lock(&self.conversation_id) = None;
        self.speaking.store(false, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            conversation_id: lock(&self.conversation_id).clone(),
            status: *lock(&self.status),
            speaking: self.speaking.load(Ordering::SeqCst),
            last_error: lock(&self.last_error).clone(),
        }
    }
}

impl SessionObserver for LiveState {
    fn on_transcript(&self, text: &str) {
        if let Some(conversation_id) = lock(&self.conversation_id).as_deref() {
            self.history.append(conversation_id, Role::Model, text);
        }
    }

    fn on_status_change(&self, status: ConnectionStatus) {
        *lock(&self.status) = status;
    }

    fn on_speaking_change(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    fn on_error(&self, error: &SessionError) {
        *lock(&self.last_error) = Some(error.to_string());
    }
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one live session this process drives
    pub controller: Arc<AsyncMutex<SessionController>>,
    pub personas: Arc<PersonaCatalog>,
    pub history: ChatHistory,
    pub transcriber: Arc<dyn Transcriber>,
    pub live: Arc<LiveState>,
}

impl AppState {
    pub fn new(
        session_config: SessionConfig,
        transport: Arc<dyn Transport>,
        devices: Arc<dyn AudioDevices>,
        personas: PersonaCatalog,
    ) -> Self {
        let history = ChatHistory::new();
        let live = Arc::new(LiveState::new(history.clone()));
        let observer = ObserverSet::new()
            .with(live.clone())
            .with(Arc::new(LoggingObserver));
        let controller = SessionController::new(session_config, transport, devices, Arc::new(observer));

        Self {
            controller: Arc::new(AsyncMutex::new(controller)),
            personas: Arc::new(personas),
            history,
            transcriber: Arc::new(DisabledTranscriber),
            live,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = transcriber;
        self
    }
}
