use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::{handlers, state::AppState};

/// Tag content never exceeds a few kilobytes.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    let tag_routes = Router::new()
        .route("/api/tags", post(handlers::tags::ingest_tag))
        .route("/api/tags/scan", post(handlers::tags::scan_tag))
        .route("/api/session", get(handlers::tags::get_session))
        .route("/api/session", delete(handlers::tags::cancel_session));

    let workout_routes = Router::new()
        .route("/api/workouts", get(handlers::workouts::list_workouts))
        .route(
            "/api/workouts/current/end",
            post(handlers::workouts::end_workout),
        )
        .route(
            "/api/workouts/current/exercises",
            post(handlers::workouts::add_manual_exercise),
        )
        .route(
            "/api/exercise-sessions/{session_id}",
            put(handlers::workouts::replace_exercise),
        )
        .route(
            "/api/machines/{machine_id}/last-session",
            get(handlers::workouts::last_machine_session),
        );

    Router::new()
        .merge(tag_routes)
        .merge(workout_routes)
        .route(
            "/api/notifications/stream",
            get(handlers::notifications::stream_notifications),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
