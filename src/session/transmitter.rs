use std::sync::Arc;
use tracing::{debug, info};

use super::gate::TurnGate;
use super::protocol::SessionProtocol;
use super::stats::SessionCounters;
use crate::audio::AudioFrame;
use crate::protocol::EncodedChunk;

/// Log every Nth sent frame at info
const SEND_LOG_INTERVAL: u64 = 100;

/// Anything that accepts encoded chunks for the remote model
pub trait MediaSink: Send + Sync {
    /// Returns whether the chunk was accepted. Never fails loudly.
    fn send_media_chunk(&self, chunk: &EncodedChunk) -> bool;
}

impl MediaSink for SessionProtocol {
    fn send_media_chunk(&self, chunk: &EncodedChunk) -> bool {
        SessionProtocol::send_media_chunk(self, chunk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitOutcome {
    /// Encoded and accepted by the sink
    Sent,
    /// Discarded because the model holds the turn
    Gated,
    /// Encoded but the sink would not take it (offline or backed up)
    Unsent,
}

/// Encodes captured frames and forwards them while the turn gate is open
///
/// The gate check and the send are not atomic: a frame racing the model
/// starting to speak may still go out.
pub struct ChunkTransmitter {
    gate: Arc<TurnGate>,
    sink: Arc<dyn MediaSink>,
    counters: Arc<SessionCounters>,
}

impl ChunkTransmitter {
    pub fn new(gate: Arc<TurnGate>, sink: Arc<dyn MediaSink>, counters: Arc<SessionCounters>) -> Self {
        Self { gate, sink, counters }
    }

    pub fn transmit(&self, frame: AudioFrame) -> TransmitOutcome {
        if !self.gate.is_open() {
            SessionCounters::bump(&self.counters.frames_gated);
            return TransmitOutcome::Gated;
        }

        let chunk = EncodedChunk::from_frame(&frame);
        if !self.sink.send_media_chunk(&chunk) {
            SessionCounters::bump(&self.counters.frames_unsent);
            return TransmitOutcome::Unsent;
        }

        let sent = SessionCounters::bump(&self.counters.frames_sent);
        if sent == 1 || sent % SEND_LOG_INTERVAL == 0 {
            info!(sent, sequence = frame.sequence, "Streaming microphone audio");
        } else {
            debug!(sequence = frame.sequence, bytes = chunk.data.len(), "Sent audio chunk");
        }

        TransmitOutcome::Sent
    }
}
