use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use postgres_types::Json;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::workout::{
        ExerciseSession, ExerciseSet, NewExerciseSession, WorkoutSession, WorkoutSummary,
    },
};

/// The durable workout store.
///
/// Every call succeeds or fails atomically. Ids are opaque strings assigned
/// by the store.
#[async_trait]
pub trait WorkoutStore: Send + Sync {
    /// Opens a new workout for `user_id`.
    async fn create_workout(&self, user_id: &str, started_at: DateTime<Utc>)
        -> Result<WorkoutSession>;

    /// Closes a workout, recording its summary.
    async fn complete_workout(&self, workout_id: &str, summary: &WorkoutSummary) -> Result<()>;

    /// Appends an exercise to a workout.
    ///
    /// Appending twice with the same user, machine and `tap_session_id`
    /// returns the exercise stored by the first call.
    async fn append_exercise_session(
        &self,
        workout_id: &str,
        session: NewExerciseSession,
    ) -> Result<ExerciseSession>;

    /// Lists a user's workouts, newest first, each with its exercises oldest first.
    async fn list_workout_history(&self, user_id: &str) -> Result<Vec<WorkoutSession>>;

    /// Replaces a stored exercise with an edited copy.
    ///
    /// The exercise keeps its workout, machine and tap session id.
    async fn replace_exercise_session(&self, session: ExerciseSession) -> Result<ExerciseSession>;
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| AppError::NotFound)
}

fn row_to_workout(row: &Row) -> Result<WorkoutSession> {
    let id: Uuid = row.try_get("id")?;
    let total_sets: Option<i32> = row.try_get("total_sets")?;

    Ok(WorkoutSession {
        workout_id: id.to_string(),
        user_id: row.try_get("user_id")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        exercise_sessions: Vec::new(),
        total_volume: row.try_get("total_volume")?,
        total_sets: total_sets.and_then(|n| u32::try_from(n).ok()),
    })
}

fn row_to_exercise(row: &Row) -> Result<ExerciseSession> {
    let id: Uuid = row.try_get("id")?;
    let workout_id: Uuid = row.try_get("workout_id")?;
    let Json(sets): Json<Vec<ExerciseSet>> = row.try_get("sets")?;

    Ok(ExerciseSession {
        session_id: id.to_string(),
        workout_id: workout_id.to_string(),
        user_id: row.try_get("user_id")?,
        machine_id: row.try_get("machine_id")?,
        machine_type: row.try_get("machine_type")?,
        machine_name: row.try_get("machine_name")?,
        tap_session_id: row.try_get("tap_session_id")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        sets,
    })
}

/// A `WorkoutStore` backed by PostgreSQL.
#[derive(Clone)]
pub struct PgWorkoutStore {
    pool: Pool,
}

impl PgWorkoutStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkoutStore for PgWorkoutStore {
    async fn create_workout(
        &self,
        user_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<WorkoutSession> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO workouts (id, user_id, started_at)
                VALUES ($1, $2, $3)
                RETURNING id, user_id, started_at, ended_at, total_volume, total_sets
                "#,
                &[&Uuid::new_v4(), &user_id, &started_at],
            )
            .await?;

        let workout = row_to_workout(&row)?;
        tracing::info!("✅ Workout created with ID: {}", workout.workout_id);
        Ok(workout)
    }

    async fn complete_workout(&self, workout_id: &str, summary: &WorkoutSummary) -> Result<()> {
        let id = parse_id(workout_id)?;
        let total_sets = i32::try_from(summary.total_sets)
            .map_err(|_| AppError::Validation("Too many sets".to_string()))?;

        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE workouts
                SET ended_at = $2, total_volume = $3, total_sets = $4
                WHERE id = $1
                "#,
                &[&id, &summary.ended_at, &summary.total_volume, &total_sets],
            )
            .await?;

        if updated == 0 {
            return Err(AppError::NotFound);
        }

        Ok(())
    }

    async fn append_exercise_session(
        &self,
        workout_id: &str,
        session: NewExerciseSession,
    ) -> Result<ExerciseSession> {
        let workout_id = parse_id(workout_id)?;
        let client = self.pool.get().await?;

        // The same user, machine and tap session id is a retry; hand back the stored row.
        let row = client
            .query_one(
                r#"
                INSERT INTO exercise_sessions
                    (id, workout_id, user_id, machine_id, machine_type, machine_name,
                     tap_session_id, started_at, ended_at, sets)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (user_id, machine_id, tap_session_id)
                    WHERE tap_session_id IS NOT NULL
                DO UPDATE SET tap_session_id = EXCLUDED.tap_session_id
                RETURNING id, workout_id, user_id, machine_id, machine_type, machine_name,
                          tap_session_id, started_at, ended_at, sets
                "#,
                &[
                    &Uuid::new_v4(),
                    &workout_id,
                    &session.user_id,
                    &session.machine_id,
                    &session.machine_type,
                    &session.machine_name,
                    &session.tap_session_id,
                    &session.started_at,
                    &session.ended_at,
                    &Json(&session.sets),
                ],
            )
            .await?;

        row_to_exercise(&row)
    }

    async fn list_workout_history(&self, user_id: &str) -> Result<Vec<WorkoutSession>> {
        let client = self.pool.get().await?;

        let workout_rows = client
            .query(
                r#"
                SELECT id, user_id, started_at, ended_at, total_volume, total_sets
                FROM workouts
                WHERE user_id = $1
                ORDER BY started_at DESC
                "#,
                &[&user_id],
            )
            .await?;

        let exercise_rows = client
            .query(
                r#"
                SELECT id, workout_id, user_id, machine_id, machine_type, machine_name,
                       tap_session_id, started_at, ended_at, sets
                FROM exercise_sessions
                WHERE user_id = $1
                ORDER BY started_at ASC
                "#,
                &[&user_id],
            )
            .await?;

        let mut by_workout: HashMap<String, Vec<ExerciseSession>> = HashMap::new();
        for row in &exercise_rows {
            let exercise = row_to_exercise(row)?;
            by_workout
                .entry(exercise.workout_id.clone())
                .or_default()
                .push(exercise);
        }

        workout_rows
            .iter()
            .map(|row| {
                let mut workout = row_to_workout(row)?;
                workout.exercise_sessions = by_workout
                    .remove(&workout.workout_id)
                    .unwrap_or_default();
                Ok(workout)
            })
            .collect()
    }

    async fn replace_exercise_session(&self, session: ExerciseSession) -> Result<ExerciseSession> {
        let id = parse_id(&session.session_id)?;
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                r#"
                UPDATE exercise_sessions
                SET machine_type = $2, machine_name = $3, started_at = $4, ended_at = $5, sets = $6
                WHERE id = $1 AND user_id = $7
                RETURNING id, workout_id, user_id, machine_id, machine_type, machine_name,
                          tap_session_id, started_at, ended_at, sets
                "#,
                &[
                    &id,
                    &session.machine_type,
                    &session.machine_name,
                    &session.started_at,
                    &session.ended_at,
                    &Json(&session.sets),
                    &session.user_id,
                ],
            )
            .await?
            .ok_or(AppError::NotFound)?;

        row_to_exercise(&row)
    }
}
