use axum::{body::Bytes, extract::State, http::StatusCode, response::Response};

use crate::{
    error::{AppError, Result},
    handlers::response::json_response,
    services::{notifier::Notifier, orchestrator::TapOutcome},
    state::AppState,
};

fn outcome_response(outcome: &TapOutcome) -> Result<Response> {
    let status = match outcome {
        TapOutcome::Rejected { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    json_response(status, outcome)
}

/// Ingests one tag read forwarded by a reader bridge.
///
/// The body is the raw tag content: JSON, or an NDEF text record wrapping it.
/// An empty body is a read of a blank tag and is rejected like any other bad read.
#[axum::debug_handler]
pub async fn ingest_tag(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let outcome = state.sessions.submit(body.to_vec()).await?;
    outcome_response(&outcome)
}

/// Reads the local tag reader once and ingests the result.
#[axum::debug_handler]
pub async fn scan_tag(State(state): State<AppState>) -> Result<Response> {
    let raw = state.reader.read_once().await.inspect_err(|e| {
        if matches!(e, AppError::TagUnavailable(_)) {
            state.notifier.notify("NFC reader unavailable");
        }
    })?;
    let outcome = state.sessions.submit(raw).await?;
    outcome_response(&outcome)
}

/// Returns the open tap session, if any.
#[axum::debug_handler]
pub async fn get_session(State(state): State<AppState>) -> Result<Response> {
    let snapshot = state.sessions.snapshot().await?;
    json_response(StatusCode::OK, &snapshot)
}

/// Cancels the open tap session without recording anything.
#[axum::debug_handler]
pub async fn cancel_session(State(state): State<AppState>) -> Result<Response> {
    let cancelled = state.sessions.cancel().await?.ok_or(AppError::NotFound)?;

    json_response(
        StatusCode::OK,
        &sonic_rs::json!({
            "cancelled_session_id": cancelled.session_id,
            "machine_id": cancelled.machine_id,
            "message": "Session cancelled"
        }),
    )
}
