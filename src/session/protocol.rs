//! Connection lifecycle to the remote model
//!
//! `disconnected -> connecting -> connected -> disconnected`. The connection
//! runs as one spawned task per `connect()`. Every state change and every
//! callback happens under the state mutex after checking the connection's
//! generation, and `disconnect()` bumps the generation under that same
//! mutex, so nothing a superseded task does is observable once
//! `disconnect()` returns.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::ProtocolConfig;
use super::events::SessionObserver;
use super::gate::TurnGate;
use super::stats::SessionCounters;
use crate::audio::output::lock;
use crate::audio::PlaybackScheduler;
use crate::error::SessionError;
use crate::protocol::{
    decode_pcm, ConnectionStatus, EncodedChunk, InboundMessage, SetupRequest, Transport,
    TransportLink, WireCodec, WireFrame,
};

/// Log every Nth inbound audio fragment at info
const FRAGMENT_LOG_INTERVAL: u64 = 50;

/// Where demultiplexed inbound events go
#[derive(Clone)]
pub struct ProtocolSinks {
    pub observer: Arc<dyn SessionObserver>,
    pub gate: Arc<TurnGate>,
    pub playback: Arc<PlaybackScheduler>,
    pub counters: Arc<SessionCounters>,
}

struct ConnectionState {
    status: ConnectionStatus,
    generation: u64,
    outbound: Option<mpsc::Sender<WireFrame>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    session_id: String,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn WireCodec>,
    config: ProtocolConfig,
    setup: SetupRequest,
    sinks: ProtocolSinks,
    state: Mutex<ConnectionState>,
}

/// Session protocol state machine
///
/// `connect`, `send_media_chunk` and `disconnect` never wait on the
/// network; outcomes are reported through the observer.
pub struct SessionProtocol {
    inner: Arc<Inner>,
}

impl SessionProtocol {
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        setup: SetupRequest,
        config: ProtocolConfig,
        sinks: ProtocolSinks,
    ) -> Self {
        let codec = config.dialect.codec();
        Self::with_codec(session_id, transport, codec, setup, config, sinks)
    }

    pub fn with_codec(
        session_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn WireCodec>,
        setup: SetupRequest,
        config: ProtocolConfig,
        sinks: ProtocolSinks,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_id: session_id.into(),
                transport,
                codec,
                config,
                setup,
                sinks,
                state: Mutex::new(ConnectionState {
                    status: ConnectionStatus::Disconnected,
                    generation: 0,
                    outbound: None,
                    task: None,
                }),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.inner.state).status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Start connecting in the background
    ///
    /// No-op while already connecting or connected. Must be called from
    /// within a Tokio runtime; otherwise the attempt fails immediately with
    /// `TransportUnavailable`.
    pub fn connect(&self) {
        let inner = &self.inner;
        let mut state = lock(&inner.state);
        if state.status != ConnectionStatus::Disconnected {
            debug!(session_id = %inner.session_id, status = %state.status, "Connect ignored");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                inner.sinks.observer.on_error(&SessionError::TransportUnavailable(
                    "no async runtime to drive the connection".to_string(),
                ));
                return;
            }
        };

        state.generation += 1;
        let generation = state.generation;
        info!(
            session_id = %inner.session_id,
            transport = inner.transport.name(),
            codec = inner.codec.name(),
            "Connecting to remote model"
        );
        inner.set_status(&mut state, ConnectionStatus::Connecting);

        state.task = Some(runtime.spawn(Arc::clone(inner).run(generation)));
    }

    /// Queue one chunk for the remote model
    ///
    /// Returns whether the chunk was queued. Not connected, or outbound queue
    /// full: the chunk is dropped silently.
    pub fn send_media_chunk(&self, chunk: &EncodedChunk) -> bool {
        let outbound = {
            let state = lock(&self.inner.state);
            if state.status != ConnectionStatus::Connected {
                return false;
            }
            match &state.outbound {
                Some(outbound) => outbound.clone(),
                None => return false,
            }
        };

        let frame = match self.inner.codec.encode_media(chunk) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session_id = %self.inner.session_id, "Failed to encode audio chunk: {}", e);
                return false;
            }
        };

        match outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(session_id = %self.inner.session_id, "Outbound queue full, chunk dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Tear down from any state
    ///
    /// Idempotent. On return the status is `disconnected`, the transport is
    /// released and playback is cleared. Must not be called from an observer
    /// callback.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let task = {
            let mut state = lock(&inner.state);
            state.generation += 1;
            state.outbound = None;
            if state.status != ConnectionStatus::Disconnected {
                info!(session_id = %inner.session_id, "Disconnecting");
                inner.set_status(&mut state, ConnectionStatus::Disconnected);
            }
            state.task.take()
        };

        if let Some(task) = task {
            task.abort();
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(session_id = %inner.session_id, "Connection task panicked: {}", e);
                }
            }
        }

        inner.sinks.gate.set_remote_turn(false);
        inner.sinks.playback.interrupt();
    }
}

impl Drop for SessionProtocol {
    fn drop(&mut self) {
        let mut state = lock(&self.inner.state);
        state.generation += 1;
        state.outbound = None;
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }
}

impl Inner {
    fn set_status(&self, state: &mut ConnectionState, status: ConnectionStatus) {
        if state.status != status {
            debug!(session_id = %self.session_id, from = %state.status, to = %status, "Status change");
            state.status = status;
            self.sinks.observer.on_status_change(status);
        }
    }

    async fn run(self: Arc<Self>, generation: u64) {
        let policy = self.config.reconnect;
        let mut retries_left = policy.max_attempts;
        let mut reconnecting = false;

        loop {
            let reason = match self.establish().await {
                Ok((link, pending)) => {
                    if !self.mark_connected(generation, &link) {
                        return;
                    }
                    retries_left = policy.max_attempts;
                    self.stream(generation, link, pending).await
                }
                // Reconnects retry an unreachable transport; handshake failures are final
                Err(error @ SessionError::TransportUnavailable(_)) if reconnecting => error,
                Err(error) => {
                    self.fail(generation, error);
                    return;
                }
            };

            if !self.mark_dropped(generation, &reason) || retries_left == 0 {
                return;
            }

            retries_left -= 1;
            reconnecting = true;
            info!(
                session_id = %self.session_id,
                attempts_left = retries_left,
                "Reconnecting in {:?}",
                policy.backoff
            );
            tokio::time::sleep(policy.backoff).await;

            if !self.mark_reconnecting(generation) {
                return;
            }
        }
    }

    /// Open the transport, send setup and wait for the acknowledgement
    ///
    /// Returns the link plus any messages that arrived in the same frame
    /// as the acknowledgement.
    async fn establish(&self) -> Result<(TransportLink, Vec<InboundMessage>), SessionError> {
        let mut link = self.transport.open().await?;

        let setup = self
            .codec
            .encode_setup(&self.setup)
            .map_err(|e| SessionError::HandshakeFailed(format!("failed to encode setup: {}", e)))?;

        let outbound = link.outbound.clone();
        outbound.send(setup).await.map_err(|_| {
            SessionError::HandshakeFailed("connection closed before setup was sent".to_string())
        })?;
        debug!(session_id = %self.session_id, "Setup sent, awaiting acknowledgement");

        let timeout = self.config.handshake_timeout;
        match tokio::time::timeout(timeout, self.await_setup_complete(&mut link.inbound)).await {
            Ok(Ok(pending)) => Ok((link, pending)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::HandshakeTimeout(timeout)),
        }
    }

    async fn await_setup_complete(
        &self,
        inbound: &mut mpsc::Receiver<WireFrame>,
    ) -> Result<Vec<InboundMessage>, SessionError> {
        loop {
            let frame = inbound.recv().await.ok_or_else(|| {
                SessionError::HandshakeFailed(
                    "connection closed before setup was acknowledged".to_string(),
                )
            })?;

            let messages = self.codec.decode(&frame).map_err(|e| {
                SessionError::HandshakeFailed(format!("unreadable acknowledgement: {}", e))
            })?;

            let mut messages = messages.into_iter();
            while let Some(message) = messages.next() {
                match message {
                    InboundMessage::SetupComplete => return Ok(messages.collect()),
                    InboundMessage::Error { message } => {
                        return Err(SessionError::HandshakeFailed(message))
                    }
                    other => debug!(
                        session_id = %self.session_id,
                        "Ignoring {:?} before setup acknowledgement",
                        other
                    ),
                }
            }
        }
    }

    /// Pump inbound frames until the link ends; returns why it ended
    async fn stream(
        &self,
        generation: u64,
        mut link: TransportLink,
        pending: Vec<InboundMessage>,
    ) -> SessionError {
        for message in pending {
            if let Err(reason) = self.dispatch(generation, message) {
                return reason;
            }
        }

        while let Some(frame) = link.inbound.recv().await {
            match self.codec.decode(&frame) {
                Ok(messages) => {
                    for message in messages {
                        if let Err(reason) = self.dispatch(generation, message) {
                            return reason;
                        }
                    }
                }
                Err(e) => {
                    SessionCounters::bump(&self.sinks.counters.malformed);
                    warn!(session_id = %self.session_id, "Dropping inbound message: {}", e);
                }
            }
        }

        SessionError::TransportDropped("connection closed by remote".to_string())
    }

    /// Route one inbound message. `Err` ends the connection.
    fn dispatch(&self, generation: u64, message: InboundMessage) -> Result<(), SessionError> {
        let state = lock(&self.state);
        if state.generation != generation {
            return Err(SessionError::TransportDropped("connection superseded".to_string()));
        }

        let sinks = &self.sinks;
        match message {
            InboundMessage::Transcript { text } => {
                SessionCounters::bump(&sinks.counters.transcripts);
                sinks.observer.on_transcript(&text);
            }
            InboundMessage::AudioFragment { data } => match decode_pcm(&data) {
                Ok(samples) => {
                    let received = SessionCounters::bump(&sinks.counters.fragments_received);
                    if received == 1 || received % FRAGMENT_LOG_INTERVAL == 0 {
                        info!(session_id = %self.session_id, received, "Receiving model audio");
                    } else {
                        debug!(session_id = %self.session_id, samples = samples.len(), "Audio fragment");
                    }
                    sinks.playback.enqueue(samples);
                }
                Err(e) => {
                    SessionCounters::bump(&sinks.counters.malformed);
                    warn!(session_id = %self.session_id, "Dropping undecodable audio fragment: {}", e);
                }
            },
            InboundMessage::TurnState { speaking } => {
                debug!(session_id = %self.session_id, speaking, "Remote turn state");
                sinks.gate.set_remote_turn(speaking);
            }
            InboundMessage::Interrupted => {
                info!(session_id = %self.session_id, "Model interrupted, clearing playback");
                sinks.gate.set_remote_turn(false);
                sinks.playback.interrupt();
            }
            InboundMessage::SetupComplete => {
                debug!(session_id = %self.session_id, "Duplicate setup acknowledgement ignored");
            }
            InboundMessage::Error { message } => {
                return Err(SessionError::TransportDropped(format!("remote error: {}", message)));
            }
        }

        drop(state);
        Ok(())
    }

    fn mark_connected(&self, generation: u64, link: &TransportLink) -> bool {
        let mut state = lock(&self.state);
        if state.generation != generation {
            return false;
        }

        state.outbound = Some(link.outbound.clone());
        info!(session_id = %self.session_id, "Connected, setup acknowledged");
        self.set_status(&mut state, ConnectionStatus::Connected);
        self.sinks.observer.on_setup_complete();
        true
    }

    fn mark_reconnecting(&self, generation: u64) -> bool {
        let mut state = lock(&self.state);
        if state.generation != generation {
            return false;
        }
        self.set_status(&mut state, ConnectionStatus::Connecting);
        true
    }

    /// Connection lost after it was up. Playback is cleared.
    fn mark_dropped(&self, generation: u64, reason: &SessionError) -> bool {
        let mut state = lock(&self.state);
        if state.generation != generation {
            return false;
        }

        state.outbound = None;
        warn!(session_id = %self.session_id, "Connection lost: {}", reason);
        self.set_status(&mut state, ConnectionStatus::Disconnected);
        self.sinks.observer.on_error(reason);
        self.sinks.gate.set_remote_turn(false);
        self.sinks.playback.interrupt();
        true
    }

    /// Connection attempt failed before it was up
    fn fail(&self, generation: u64, reason: SessionError) {
        let mut state = lock(&self.state);
        if state.generation != generation {
            return;
        }

        state.outbound = None;
        warn!(session_id = %self.session_id, "Connection failed: {}", reason);
        self.set_status(&mut state, ConnectionStatus::Disconnected);
        self.sinks.observer.on_error(&reason);
    }
}
