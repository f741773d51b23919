use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Router for the control API, sharing one `AppState`
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Liveness and catalog
        .route("/health", get(handlers::health_check))
        .route("/personas", get(handlers::list_personas))
        // Live session control
        .route("/session/start", post(handlers::start_session))
        .route("/session/stop", post(handlers::stop_session))
        .route("/session/status", get(handlers::session_status))
        // Conversation queries
        .route(
            "/conversations/:conversation_id/messages",
            get(handlers::conversation_messages),
        )
        .route("/transcribe", post(handlers::transcribe))
        // One span per request
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
