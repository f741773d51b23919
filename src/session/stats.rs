use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::ConnectionStatus;

/// Counters shared by the pipeline stages of one session
#[derive(Debug, Default)]
pub struct SessionCounters {
    /// Frames handed to the protocol
    pub frames_sent: AtomicU64,
    /// Frames discarded by the turn gate
    pub frames_gated: AtomicU64,
    /// Frames the protocol would not take (not connected or outbound queue full)
    pub frames_unsent: AtomicU64,
    /// Audio fragments received from the model
    pub fragments_received: AtomicU64,
    /// Transcript fragments received from the model
    pub transcripts: AtomicU64,
    /// Inbound messages dropped as malformed
    pub malformed: AtomicU64,
}

impl SessionCounters {
    pub(crate) fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Statistics about a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub persona_id: String,

    pub status: ConnectionStatus,

    /// Whether the model currently holds the turn
    pub speaking: bool,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    pub frames_captured: u64,

    /// Frames lost because the transmitter fell behind capture
    pub frames_dropped: u64,

    pub frames_sent: u64,

    pub frames_gated: u64,

    /// Frames the protocol refused (not connected or outbound queue full)
    pub frames_unsent: u64,

    pub fragments_received: u64,

    pub fragments_played: u64,

    /// Fragments still waiting to finish playing
    pub fragments_queued: usize,

    /// Number of transcript segments received
    pub transcript_segments_count: u64,

    pub malformed_messages: u64,
}
