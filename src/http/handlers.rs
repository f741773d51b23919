use super::state::{AppState, LiveSnapshot};
use crate::error::SessionError;
use crate::history::ChatMessage;
use crate::protocol::ConnectionStatus;
use crate::session::SessionStats;
use crate::transcription::TranscriptionError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Persona id (default: first configured persona)
    pub persona: Option<String>,

    /// Conversation to append transcripts to (if not provided, generate UUID)
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub conversation_id: String,
    pub persona: String,
    pub status: ConnectionStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopSessionResponse {
    pub status: String,
    pub message: String,
    /// Final statistics, absent if no session was active
    pub stats: Option<SessionStats>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub active: bool,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub status: ConnectionStatus,
    pub speaking: bool,
    pub last_error: Option<String>,
    pub stats: Option<SessionStats>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersonaSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    pub audio_base64: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /personas
/// Personas a session can be started with
pub async fn list_personas(State(state): State<AppState>) -> impl IntoResponse {
    let personas: Vec<PersonaSummary> = state
        .personas
        .list()
        .iter()
        .map(|p| PersonaSummary {
            id: p.id.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
        })
        .collect();

    (StatusCode::OK, Json(personas)).into_response()
}

/// POST /session/start
/// Start the live session
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let persona = match &req.persona {
        Some(id) => match state.personas.get(id) {
            Some(persona) => persona.clone(),
            None => {
                return error_response(StatusCode::NOT_FOUND, format!("Persona {} not found", id));
            }
        },
        None => state.personas.default_persona().clone(),
    };

    let conversation_id = req
        .conversation_id
        .unwrap_or_else(|| format!("conversation-{}", uuid::Uuid::new_v4()));

    let mut controller = state.controller.lock().await;

    // Reject before rerouting the running session's transcripts
    if controller.is_active() {
        return error_response(
            StatusCode::CONFLICT,
            SessionError::AlreadyActive.to_string(),
        );
    }

    info!("Starting session with persona {} for {}", persona.id, conversation_id);
    state.live.begin(conversation_id.clone());

    match controller.start_session(&persona).await {
        Ok(session_id) => (
            StatusCode::OK,
            Json(StartSessionResponse {
                session_id,
                conversation_id,
                persona: persona.id,
                status: controller.status(),
            }),
        )
            .into_response(),
        Err(e) => {
            state.live.end();
            error!("Failed to start session: {}", e);
            let status = match e {
                SessionError::AlreadyActive => StatusCode::CONFLICT,
                SessionError::CaptureUnavailable(_) | SessionError::OutputUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, e.to_string())
        }
    }
}

/// POST /session/stop
/// Stop the live session (no-op if none is active)
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.controller.lock().await.stop_session().await;
    state.live.end();

    let message = match &stats {
        Some(stats) => format!("Session {} stopped", stats.session_id),
        None => "No active session".to_string(),
    };

    (
        StatusCode::OK,
        Json(StopSessionResponse {
            status: "stopped".to_string(),
            message,
            stats,
        }),
    )
        .into_response()
}

/// GET /session/status
pub async fn session_status(State(state): State<AppState>) -> impl IntoResponse {
    let controller = state.controller.lock().await;
    let LiveSnapshot {
        conversation_id,
        speaking,
        last_error,
        ..
    } = state.live.snapshot();

    (
        StatusCode::OK,
        Json(SessionStatusResponse {
            active: controller.is_active(),
            session_id: controller.session_id().map(str::to_string),
            conversation_id,
            status: controller.status(),
            speaking,
            last_error,
            stats: controller.stats(),
        }),
    )
        .into_response()
}

/// GET /conversations/:conversation_id/messages
pub async fn conversation_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    let messages: Vec<ChatMessage> = state.history.messages(&conversation_id);
    (StatusCode::OK, Json(messages)).into_response()
}

/// POST /transcribe
/// Transcribe an uploaded clip via the transcription collaborator
pub async fn transcribe(
    State(state): State<AppState>,
    Json(req): Json<TranscribeRequest>,
) -> impl IntoResponse {
    let mime_type = req.mime_type.as_deref().unwrap_or("audio/wav");

    match state.transcriber.transcribe(&req.audio_base64, mime_type).await {
        Ok(text) => (StatusCode::OK, Json(TranscribeResponse { text })).into_response(),
        Err(e @ TranscriptionError::InvalidAudio(_)) => {
            warn!("Rejected transcription request: {}", e);
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            error!("Transcription failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}
