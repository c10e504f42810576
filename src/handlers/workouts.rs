use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::Utc;
use garde::Validate;
use serde::Deserialize;

use crate::{
    error::{AppError, Result},
    handlers::response::json_response,
    models::weight::WeightUnit,
    services::workouts::{self as workout_service, SetEntry},
    state::AppState,
};

/// The `unit` query parameter of the history views.
#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub unit: WeightUnit,
}

/// The request payload for a manually entered exercise.
#[derive(Deserialize, Validate)]
pub struct ManualExerciseRequest {
    #[garde(length(min = 1, max = 100))]
    pub exercise_name: String,
    #[garde(skip)]
    #[serde(default)]
    pub unit: WeightUnit,
    #[garde(length(min = 1, max = 50), dive)]
    pub sets: Vec<SetEntry>,
}

/// The request payload for replacing an exercise's sets.
#[derive(Deserialize, Validate)]
pub struct ReplaceExerciseRequest {
    #[garde(skip)]
    #[serde(default)]
    pub unit: WeightUnit,
    #[garde(length(min = 1, max = 50), dive)]
    pub sets: Vec<SetEntry>,
}

fn validate<T: Validate<Context = ()>>(req: &T) -> Result<()> {
    req.validate()
        .map_err(|report| AppError::Validation(report.to_string()))
}

/// Lists the user's workouts, newest first.
#[axum::debug_handler]
pub async fn list_workouts(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response> {
    let workouts = workout_service::list_history(&state, query.unit).await?;
    json_response(StatusCode::OK, &workouts)
}

/// Completes the open workout.
#[axum::debug_handler]
pub async fn end_workout(State(state): State<AppState>) -> Result<Response> {
    let workout = state.sessions.end_workout().await?.ok_or(AppError::NotFound)?;
    let view = workout_service::workout_view(&workout, WeightUnit::default());
    json_response(StatusCode::OK, &view)
}

/// Adds a manually entered exercise to the open workout.
#[axum::debug_handler]
pub async fn add_manual_exercise(
    State(state): State<AppState>,
    Json(req): Json<ManualExerciseRequest>,
) -> Result<Response> {
    validate(&req)?;

    let entry = workout_service::build_manual_entry(
        &state.config.user_id,
        &req.exercise_name,
        &req.sets,
        req.unit,
        Utc::now(),
    )?;
    let exercise = state.sessions.add_manual_exercise(entry).await?;

    json_response(StatusCode::CREATED, &exercise)
}

/// Replaces the sets of a stored exercise session.
#[axum::debug_handler]
pub async fn replace_exercise(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ReplaceExerciseRequest>,
) -> Result<Response> {
    validate(&req)?;

    let exercise =
        workout_service::replace_exercise(&state, &session_id, &req.sets, req.unit).await?;
    json_response(StatusCode::OK, &exercise)
}

/// Returns a machine and the user's most recent exercise on it.
#[axum::debug_handler]
pub async fn last_machine_session(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response> {
    let found = workout_service::last_session_for_machine(&state, &machine_id, query.unit).await?;
    json_response(StatusCode::OK, &found)
}
