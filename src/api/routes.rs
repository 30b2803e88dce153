//! API route definitions.

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;
use super::turn;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let api_routes = Router::new()
        // Projects and their connections
        .route("/projects", get(handlers::list_projects))
        .route("/projects", post(handlers::create_project))
        .route("/projects/{project_id}", get(handlers::get_project))
        .route("/projects/{project_id}", put(handlers::update_project))
        .route("/projects/{project_id}", delete(handlers::delete_project))
        .route(
            "/projects/{project_id}/connections",
            post(handlers::create_connection),
        )
        .route(
            "/connections/{connection_id}",
            put(handlers::update_connection),
        )
        .route(
            "/connections/{connection_id}",
            delete(handlers::delete_connection),
        )
        // Sessions and transcripts
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/{session_id}", get(handlers::get_session))
        .route("/sessions/{session_id}", delete(handlers::delete_session))
        .route(
            "/sessions/{session_id}/messages",
            get(handlers::list_messages),
        )
        .route(
            "/sessions/{session_id}/messages",
            post(turn::submit_prompt),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api_routes)
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
