use std::time::Duration;
use thiserror::Error;

/// Failures a live session can surface to its owner.
///
/// Sends attempted after teardown are not represented here: they are
/// silently ignored by the protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Microphone permission denied or no usable input device
    #[error("capture device unavailable: {0}")]
    CaptureUnavailable(String),

    /// No usable output device for model audio
    #[error("output device unavailable: {0}")]
    OutputUnavailable(String),

    /// The transport to the remote model could not be established
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Transport established but setup was rejected or malformed
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Setup was not acknowledged in time
    #[error("handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),

    /// Connection lost while streaming
    #[error("transport dropped: {0}")]
    TransportDropped(String),

    /// Inbound message that matches no known kind
    #[error("malformed inbound message: {0}")]
    MalformedInbound(String),

    /// `start_session` called while a session is still active
    #[error("a session is already active; stop it first")]
    AlreadyActive,
}
