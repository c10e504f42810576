use chrono::{DateTime, Duration, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::{
        machine,
        weight::{self, WeightUnit},
        workout::{ExerciseSession, ExerciseSet, NewExerciseSession, WorkoutSession},
    },
    state::AppState,
};

const MAX_ENTERED_WEIGHT: f64 = 2000.0;

/// A weight typed into the app: a number, or the raw text of the input field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WeightInput {
    Amount(f64),
    Text(String),
}

impl WeightInput {
    /// The weight in stored pounds. Text that is not a number counts as zero.
    pub fn to_stored_lbs(&self, unit: WeightUnit) -> f64 {
        match self {
            WeightInput::Amount(value) => weight::to_stored_lbs(*value, unit),
            WeightInput::Text(text) => weight::parse_weight_input(text, unit),
        }
    }
}

fn entered_weight_in_range(value: &WeightInput, _ctx: &()) -> garde::Result {
    let entered = match value {
        WeightInput::Amount(value) => *value,
        WeightInput::Text(text) => text.trim().parse::<f64>().unwrap_or(0.0),
    };

    if entered.is_finite() && (0.0..=MAX_ENTERED_WEIGHT).contains(&entered) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "weight must be between 0 and {}",
            MAX_ENTERED_WEIGHT
        )))
    }
}

/// One set as entered by the user, in the user's unit.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SetEntry {
    #[garde(custom(entered_weight_in_range))]
    pub weight: WeightInput,
    #[garde(range(min = 1, max = 1000))]
    pub reps: u32,
    #[garde(skip)]
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// A set converted into the requested display unit.
#[derive(Debug, Clone, Serialize)]
pub struct SetView {
    pub weight: f64,
    pub weight_display: String,
    pub reps: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExerciseView {
    pub session_id: String,
    pub machine_id: String,
    pub exercise_name: String,
    pub machine_type: Option<String>,
    pub manual: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub sets: Vec<SetView>,
    pub volume: f64,
}

/// A workout as shown in the history screen.
#[derive(Debug, Clone, Serialize)]
pub struct WorkoutView {
    pub workout_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub in_progress: bool,
    pub total_sets: u32,
    pub total_volume: f64,
    pub total_volume_display: String,
    pub unit: WeightUnit,
    pub exercises: Vec<ExerciseView>,
}

fn to_stored_sets(entries: &[SetEntry], unit: WeightUnit) -> Vec<ExerciseSet> {
    entries
        .iter()
        .map(|entry| ExerciseSet {
            weight_lbs: entry.weight.to_stored_lbs(unit),
            reps: entry.reps,
            duration_ms: entry.duration_ms.unwrap_or(0),
        })
        .collect()
}

fn exercise_view(session: &ExerciseSession, unit: WeightUnit) -> ExerciseView {
    ExerciseView {
        session_id: session.session_id.clone(),
        machine_id: session.machine_id.clone(),
        exercise_name: machine::display_name(&session.machine_id, session.machine_name.as_deref()),
        machine_type: session.machine_type.clone(),
        manual: machine::manual_exercise_name(&session.machine_id).is_some(),
        started_at: session.started_at,
        ended_at: session.ended_at,
        sets: session
            .sets
            .iter()
            .map(|set| SetView {
                weight: weight::convert_weight(set.weight_lbs, unit),
                weight_display: weight::format_weight(set.weight_lbs, unit),
                reps: set.reps,
                duration_ms: set.duration_ms,
            })
            .collect(),
        volume: weight::convert_weight(session.volume(), unit),
    }
}

/// Builds the history view of a workout in `unit`.
///
/// Open workouts have no recorded totals yet, so theirs are computed from
/// the exercises logged so far.
pub fn workout_view(workout: &WorkoutSession, unit: WeightUnit) -> WorkoutView {
    let total_volume_lbs = workout
        .total_volume
        .unwrap_or_else(|| workout.exercise_sessions.iter().map(ExerciseSession::volume).sum());
    let total_sets = workout.total_sets.unwrap_or_else(|| {
        let sets: usize = workout.exercise_sessions.iter().map(|e| e.sets.len()).sum();
        u32::try_from(sets).unwrap_or(u32::MAX)
    });

    WorkoutView {
        workout_id: workout.workout_id.clone(),
        started_at: workout.started_at,
        ended_at: workout.ended_at,
        in_progress: workout.is_open(),
        total_sets,
        total_volume: weight::convert_weight(total_volume_lbs, unit),
        total_volume_display: weight::format_weight(total_volume_lbs, unit),
        unit,
        exercises: workout
            .exercise_sessions
            .iter()
            .map(|session| exercise_view(session, unit))
            .collect(),
    }
}

/// Builds a manually entered exercise ending at `ended_at`.
///
/// # Arguments
///
/// * `user_id` - The user the exercise belongs to.
/// * `exercise_name` - The free-form exercise name.
/// * `sets` - The sets, in `unit`.
/// * `unit` - The unit the weights were entered in.
/// * `ended_at` - When the exercise finished.
///
/// # Returns
///
/// A `Result` containing the `NewExerciseSession`.
pub fn build_manual_entry(
    user_id: &str,
    exercise_name: &str,
    sets: &[SetEntry],
    unit: WeightUnit,
    ended_at: DateTime<Utc>,
) -> Result<NewExerciseSession> {
    let machine_id = machine::manual_machine_id(exercise_name);
    if machine_id == machine::MANUAL_PREFIX {
        return Err(AppError::Validation(
            "Exercise name must contain letters or digits".to_string(),
        ));
    }

    if sets.is_empty() {
        return Err(AppError::Validation(
            "At least one set is required".to_string(),
        ));
    }

    let sets = to_stored_sets(sets, unit);
    let total_ms: u64 = sets.iter().map(|s| s.duration_ms).sum();
    let started_at = ended_at - Duration::milliseconds(i64::try_from(total_ms).unwrap_or(0));

    Ok(NewExerciseSession {
        user_id: user_id.to_string(),
        machine_id,
        machine_type: Some(machine::MANUAL_MACHINE_TYPE.to_string()),
        machine_name: Some(exercise_name.trim().to_string()),
        tap_session_id: None,
        started_at,
        ended_at,
        sets,
    })
}

/// Lists the user's workouts, newest first.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `unit` - The unit weights are shown in.
///
/// # Returns
///
/// A `Result` containing a `Vec<WorkoutView>`.
pub async fn list_history(state: &AppState, unit: WeightUnit) -> Result<Vec<WorkoutView>> {
    let history = state
        .store
        .list_workout_history(&state.config.user_id)
        .await?;

    Ok(history.iter().map(|w| workout_view(w, unit)).collect())
}

/// A machine and the user's most recent exercise on it.
#[derive(Debug, Clone, Serialize)]
pub struct MachineLastSession {
    pub machine_id: String,
    pub machine: Option<machine::MachineInfo>,
    pub last_session: Option<ExerciseView>,
}

/// Finds the user's most recent exercise on a machine.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `machine_id` - The machine to look up.
/// * `unit` - The unit weights are shown in.
///
/// # Returns
///
/// A `Result` containing the `MachineLastSession`. `last_session` is `None`
/// when the user never used the machine.
pub async fn last_session_for_machine(
    state: &AppState,
    machine_id: &str,
    unit: WeightUnit,
) -> Result<MachineLastSession> {
    let history = state
        .store
        .list_workout_history(&state.config.user_id)
        .await?;

    let last = history
        .iter()
        .flat_map(|w| w.exercise_sessions.iter())
        .filter(|e| e.machine_id == machine_id)
        .max_by_key(|e| e.ended_at);

    Ok(MachineLastSession {
        machine_id: machine_id.to_string(),
        machine: machine::machine_info(machine_id, last.and_then(|e| e.machine_name.as_deref())),
        last_session: last.map(|e| exercise_view(e, unit)),
    })
}

/// Replaces the sets of a stored exercise session with an edited copy.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `session_id` - The exercise session to edit.
/// * `sets` - The edited sets, in `unit`.
/// * `unit` - The unit the weights were entered in.
///
/// # Returns
///
/// A `Result` containing the stored replacement.
pub async fn replace_exercise(
    state: &AppState,
    session_id: &str,
    sets: &[SetEntry],
    unit: WeightUnit,
) -> Result<ExerciseSession> {
    if sets.is_empty() {
        return Err(AppError::Validation(
            "At least one set is required".to_string(),
        ));
    }

    let history = state
        .store
        .list_workout_history(&state.config.user_id)
        .await?;

    let existing = history
        .into_iter()
        .flat_map(|w| w.exercise_sessions)
        .find(|e| e.session_id == session_id)
        .ok_or(AppError::NotFound)?;

    let replacement = ExerciseSession {
        sets: to_stored_sets(sets, unit),
        ..existing
    };

    let stored = state.store.replace_exercise_session(replacement).await?;
    tracing::info!("✏️ Exercise session {} replaced", stored.session_id);
    Ok(stored)
}
