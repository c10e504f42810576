use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::tag::SetRecord;

/// A set as stored with an exercise session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSet {
    /// The weight lifted, in pounds.
    pub weight_lbs: f64,
    /// The number of repetitions.
    pub reps: u32,
    /// How long the set took, in milliseconds.
    pub duration_ms: u64,
}

impl ExerciseSet {
    /// Pounds moved in this set.
    pub fn volume(&self) -> f64 {
        self.weight_lbs * f64::from(self.reps)
    }
}

impl From<&SetRecord> for ExerciseSet {
    fn from(set: &SetRecord) -> Self {
        Self {
            weight_lbs: set.weight_lbs,
            reps: set.reps,
            duration_ms: set.duration_ms,
        }
    }
}

/// An exercise session before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExerciseSession {
    /// The ID of the user who performed the exercise.
    pub user_id: String,
    /// The machine identifier, or a `manual-` id for manual entries.
    pub machine_id: String,
    /// The type of machine.
    pub machine_type: Option<String>,
    /// The machine or exercise name shown to the user.
    #[serde(default)]
    pub machine_name: Option<String>,
    /// The tag session this exercise was captured from. Together with the
    /// user and machine it is the store's idempotency key.
    pub tap_session_id: Option<String>,
    /// When the exercise started.
    pub started_at: DateTime<Utc>,
    /// When the exercise ended.
    pub ended_at: DateTime<Utc>,
    /// The sets performed, in order.
    pub sets: Vec<ExerciseSet>,
}

/// One completed set-group on a machine, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSession {
    /// The store-assigned identifier.
    pub session_id: String,
    /// The workout this exercise belongs to.
    pub workout_id: String,
    pub user_id: String,
    pub machine_id: String,
    pub machine_type: Option<String>,
    #[serde(default)]
    pub machine_name: Option<String>,
    pub tap_session_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub sets: Vec<ExerciseSet>,
}

impl ExerciseSession {
    /// Attaches store-assigned identifiers to a new session.
    pub fn from_new(session_id: String, workout_id: String, new: NewExerciseSession) -> Self {
        Self {
            session_id,
            workout_id,
            user_id: new.user_id,
            machine_id: new.machine_id,
            machine_type: new.machine_type,
            machine_name: new.machine_name,
            tap_session_id: new.tap_session_id,
            started_at: new.started_at,
            ended_at: new.ended_at,
            sets: new.sets,
        }
    }

    /// Pounds moved across every set.
    pub fn volume(&self) -> f64 {
        self.sets.iter().map(ExerciseSet::volume).sum()
    }
}

/// A workout: an open-ended container of exercise sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSession {
    /// The store-assigned identifier.
    pub workout_id: String,
    /// The ID of the user who owns the workout.
    pub user_id: String,
    /// When the workout started.
    pub started_at: DateTime<Utc>,
    /// When the workout ended; `None` while it is open.
    pub ended_at: Option<DateTime<Utc>>,
    /// The exercises performed, oldest first.
    pub exercise_sessions: Vec<ExerciseSession>,
    /// Pounds moved across the workout, set on completion.
    pub total_volume: Option<f64>,
    /// Sets performed across the workout, set on completion.
    pub total_sets: Option<u32>,
}

impl WorkoutSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// The aggregates recorded when a workout is completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSummary {
    pub ended_at: DateTime<Utc>,
    pub total_volume: f64,
    pub total_sets: u32,
}

impl WorkoutSummary {
    /// Computes the summary of a workout ending at `ended_at`.
    ///
    /// # Arguments
    ///
    /// * `sessions` - The exercise sessions of the workout.
    /// * `ended_at` - The completion time.
    ///
    /// # Returns
    ///
    /// The `WorkoutSummary`.
    pub fn from_sessions(sessions: &[ExerciseSession], ended_at: DateTime<Utc>) -> Self {
        let total_volume = sessions.iter().map(ExerciseSession::volume).sum();
        let total_sets = sessions
            .iter()
            .map(|session| session.sets.len())
            .sum::<usize>();

        Self {
            ended_at,
            total_volume,
            total_sets: u32::try_from(total_sets).unwrap_or(u32::MAX),
        }
    }
}
