//! HTTP API server for external control
//!
//! This module provides a REST API for driving the live session:
//! - GET /personas - List selectable personas
//! - POST /session/start - Start the live session
//! - POST /session/stop - Stop it
//! - GET /session/status - Connection status and statistics
//! - GET /conversations/:id/messages - Transcript history of a conversation
//! - POST /transcribe - Transcribe an uploaded clip
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{
    ErrorResponse, PersonaSummary, SessionStatusResponse, StartSessionRequest,
    StartSessionResponse, StopSessionResponse, TranscribeResponse,
};
pub use routes::create_router;
pub use state::{AppState, LiveSnapshot, LiveState};
