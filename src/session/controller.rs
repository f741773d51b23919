use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::events::SessionObserver;
use super::gate::TurnGate;
use super::protocol::{ProtocolSinks, SessionProtocol};
use super::stats::{SessionCounters, SessionStats};
use super::transmitter::ChunkTransmitter;
use crate::audio::{
    AudioBackend, AudioBackendConfig, AudioDevices, CaptureCounters, OutputDevice,
    PlaybackScheduler, SampleFramer,
};
use crate::error::SessionError;
use crate::persona::Persona;
use crate::protocol::{ConnectionStatus, SetupRequest, Transport};

/// Everything one live session owns, released together
struct ActiveSession {
    session_id: String,
    persona_id: String,
    started_at: DateTime<Utc>,
    capture: Box<dyn AudioBackend>,
    output: Arc<dyn OutputDevice>,
    protocol: Arc<SessionProtocol>,
    playback: Arc<PlaybackScheduler>,
    gate: Arc<TurnGate>,
    counters: Arc<SessionCounters>,
    capture_counters: Arc<CaptureCounters>,
    /// Capture frames -> input level + transmitter
    pump: JoinHandle<()>,
    /// Playback bookkeeping against the output clock
    ticker: JoinHandle<()>,
}

impl ActiveSession {
    fn snapshot(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        let forwarded = SessionCounters::get(&self.capture_counters.frames);
        let dropped = SessionCounters::get(&self.capture_counters.dropped);

        SessionStats {
            session_id: self.session_id.clone(),
            persona_id: self.persona_id.clone(),
            status: self.protocol.status(),
            speaking: self.gate.is_speaking(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_captured: forwarded + dropped,
            frames_dropped: dropped,
            frames_sent: SessionCounters::get(&self.counters.frames_sent),
            frames_gated: SessionCounters::get(&self.counters.frames_gated),
            frames_unsent: SessionCounters::get(&self.counters.frames_unsent),
            fragments_received: SessionCounters::get(&self.counters.fragments_received),
            fragments_played: self.playback.fragments_played(),
            fragments_queued: self.playback.queued_fragments(),
            transcript_segments_count: SessionCounters::get(&self.counters.transcripts),
            malformed_messages: SessionCounters::get(&self.counters.malformed),
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        // Reached without stop_session only when the controller itself is dropped
        self.pump.abort();
        self.ticker.abort();
        self.output.close();
    }
}

/// Top-level object a CLI or HTTP layer binds to
///
/// Owns at most one live session at a time: its capture device, output
/// device, protocol and playback queue. All of them are acquired in
/// `start_session` and released in `stop_session`.
pub struct SessionController {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    devices: Arc<dyn AudioDevices>,
    observer: Arc<dyn SessionObserver>,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        devices: Arc<dyn AudioDevices>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            config,
            transport,
            devices,
            observer,
            active: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|session| session.session_id.as_str())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.active
            .as_ref()
            .map(|session| session.protocol.status())
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    /// Current session statistics, if a session is active
    pub fn stats(&self) -> Option<SessionStats> {
        self.active.as_ref().map(ActiveSession::snapshot)
    }

    /// Acquire devices, start capture and begin connecting
    ///
    /// Returns the new session id. Connection progress is reported through
    /// the observer. Fails with `AlreadyActive` if a session is running; on
    /// any failure nothing acquired here is left open.
    pub async fn start_session(&mut self, persona: &Persona) -> Result<String, SessionError> {
        if self.active.is_some() {
            warn!("start_session called while a session is active");
            return Err(SessionError::AlreadyActive);
        }

        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        info!(session_id = %session_id, persona = %persona.id, "Starting live session");

        let backend_config = AudioBackendConfig {
            target_sample_rate: self.config.sample_rate,
            frame_size: self.config.frame_size,
            queue_depth: self.config.capture_queue_depth,
            realtime: self.config.realtime_input,
        };

        let mut capture = self
            .devices
            .open_capture(backend_config)
            .map_err(|e| SessionError::CaptureUnavailable(format!("{:#}", e)))?;

        let output = self
            .devices
            .open_output()
            .map_err(|e| SessionError::OutputUnavailable(format!("{:#}", e)))?;

        let counters = Arc::new(SessionCounters::default());
        let capture_counters = Arc::new(CaptureCounters::default());
        let gate = Arc::new(TurnGate::new(Arc::clone(&self.observer)));
        let playback = Arc::new(PlaybackScheduler::new(
            Arc::clone(&output),
            self.config.output_sample_rate,
            gate.clone(),
        ));

        let protocol = Arc::new(SessionProtocol::new(
            session_id.clone(),
            Arc::clone(&self.transport),
            SetupRequest {
                model: self.config.protocol.model.clone(),
                system_instructions: persona.system_instructions.clone(),
            },
            self.config.protocol.clone(),
            ProtocolSinks {
                observer: Arc::clone(&self.observer),
                gate: gate.clone(),
                playback: playback.clone(),
                counters: counters.clone(),
            },
        ));

        let (frame_tx, mut frame_rx) = mpsc::channel(self.config.capture_queue_depth.max(1));
        let framer = SampleFramer::new(
            self.config.frame_size,
            self.config.sample_rate,
            frame_tx,
            capture_counters.clone(),
        );

        if let Err(e) = capture.start(framer).await {
            output.close();
            let error = SessionError::CaptureUnavailable(format!("{:#}", e));
            warn!(session_id = %session_id, "Session not started: {}", error);
            return Err(error);
        }
        info!(session_id = %session_id, "Capture started: {}", capture.name());

        protocol.connect();

        let transmitter = ChunkTransmitter::new(gate.clone(), protocol.clone(), counters.clone());
        let observer = Arc::clone(&self.observer);
        let pump = tokio::spawn(async move {
            while let Some(captured) = frame_rx.recv().await {
                observer.on_input_level(captured.level);
                transmitter.transmit(captured.frame);
            }
            debug!("Capture pump finished");
        });

        let tick_playback = playback.clone();
        let period = self.config.playback_tick.max(std::time::Duration::from_millis(1));
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tick_playback.tick();
            }
        });

        self.active = Some(ActiveSession {
            session_id: session_id.clone(),
            persona_id: persona.id.clone(),
            started_at: Utc::now(),
            capture,
            output,
            protocol,
            playback,
            gate,
            counters,
            capture_counters,
            pump,
            ticker,
        });

        Ok(session_id)
    }

    /// Release everything the active session holds
    ///
    /// Safe to call at any time; a no-op without an active session.
    /// Returns the final statistics of the session it stopped.
    pub async fn stop_session(&mut self) -> Option<SessionStats> {
        let Some(mut session) = self.active.take() else {
            debug!("stop_session: no active session");
            return None;
        };

        info!(session_id = %session.session_id, "Stopping live session");

        if let Err(e) = session.capture.stop().await {
            error!(session_id = %session.session_id, "Failed to stop capture: {:#}", e);
        }

        session.pump.abort();
        session.ticker.abort();
        let _ = (&mut session.pump).await;
        let _ = (&mut session.ticker).await;

        session.protocol.disconnect().await;
        session.output.close();

        let stats = session.snapshot();
        info!(
            session_id = %stats.session_id,
            duration_secs = stats.duration_secs,
            frames_sent = stats.frames_sent,
            frames_gated = stats.frames_gated,
            fragments_received = stats.fragments_received,
            "Live session stopped"
        );

        Some(stats)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!("SessionController dropped with an active session; call stop_session first");
        }
    }
}
