use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::workout::{ExerciseSession, NewExerciseSession, WorkoutSession, WorkoutSummary},
    repositories::workout::WorkoutStore,
};

/// A `WorkoutStore` held in process memory.
///
/// Used when no database is configured, and by tests.
#[derive(Clone, Default)]
pub struct InMemoryWorkoutStore {
    workouts: Arc<RwLock<Vec<WorkoutSession>>>,
}

impl InMemoryWorkoutStore {
    /// Creates a new, empty `InMemoryWorkoutStore`.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkoutStore for InMemoryWorkoutStore {
    async fn create_workout(
        &self,
        user_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<WorkoutSession> {
        let workout = WorkoutSession {
            workout_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            started_at,
            ended_at: None,
            exercise_sessions: Vec::new(),
            total_volume: None,
            total_sets: None,
        };

        self.workouts.write().await.push(workout.clone());
        tracing::debug!("Workout created in memory: {}", workout.workout_id);
        Ok(workout)
    }

    async fn complete_workout(&self, workout_id: &str, summary: &WorkoutSummary) -> Result<()> {
        let mut workouts = self.workouts.write().await;
        let workout = workouts
            .iter_mut()
            .find(|w| w.workout_id == workout_id)
            .ok_or(AppError::NotFound)?;

        workout.ended_at = Some(summary.ended_at);
        workout.total_volume = Some(summary.total_volume);
        workout.total_sets = Some(summary.total_sets);
        Ok(())
    }

    async fn append_exercise_session(
        &self,
        workout_id: &str,
        session: NewExerciseSession,
    ) -> Result<ExerciseSession> {
        let mut workouts = self.workouts.write().await;

        if let Some(tap_id) = session.tap_session_id.as_deref() {
            let existing = workouts
                .iter()
                .flat_map(|w| w.exercise_sessions.iter())
                .find(|e| {
                    e.tap_session_id.as_deref() == Some(tap_id)
                        && e.user_id == session.user_id
                        && e.machine_id == session.machine_id
                });
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }

        let workout = workouts
            .iter_mut()
            .find(|w| w.workout_id == workout_id)
            .ok_or(AppError::NotFound)?;

        let exercise =
            ExerciseSession::from_new(Uuid::new_v4().to_string(), workout_id.to_string(), session);
        workout.exercise_sessions.push(exercise.clone());
        Ok(exercise)
    }

    async fn list_workout_history(&self, user_id: &str) -> Result<Vec<WorkoutSession>> {
        let workouts = self.workouts.read().await;

        let mut history: Vec<WorkoutSession> = workouts
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();

        history.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        for workout in &mut history {
            workout
                .exercise_sessions
                .sort_by(|a, b| a.started_at.cmp(&b.started_at));
        }

        Ok(history)
    }

    async fn replace_exercise_session(&self, session: ExerciseSession) -> Result<ExerciseSession> {
        let mut workouts = self.workouts.write().await;

        let slot = workouts
            .iter_mut()
            .flat_map(|w| w.exercise_sessions.iter_mut())
            .find(|e| e.session_id == session.session_id && e.user_id == session.user_id)
            .ok_or(AppError::NotFound)?;

        let replaced = ExerciseSession {
            workout_id: slot.workout_id.clone(),
            machine_id: slot.machine_id.clone(),
            tap_session_id: slot.tap_session_id.clone(),
            ..session
        };
        *slot = replaced.clone();
        Ok(replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workout::ExerciseSet;

    fn new_session(tap: Option<&str>, started: i64) -> NewExerciseSession {
        NewExerciseSession {
            user_id: "u1".into(),
            machine_id: "machine-001".into(),
            machine_type: Some("cable_stack".into()),
            machine_name: Some("Lat Pulldown".into()),
            tap_session_id: tap.map(str::to_string),
            started_at: DateTime::from_timestamp(started, 0).unwrap(),
            ended_at: DateTime::from_timestamp(started + 60, 0).unwrap(),
            sets: vec![ExerciseSet {
                weight_lbs: 90.0,
                reps: 10,
                duration_ms: 30_000,
            }],
        }
    }

    #[tokio::test]
    async fn append_is_idempotent_per_tap_session() {
        let store = InMemoryWorkoutStore::new();
        let workout = store.create_workout("u1", Utc::now()).await.unwrap();

        let first = store
            .append_exercise_session(&workout.workout_id, new_session(Some("s1"), 1000))
            .await
            .unwrap();
        let retry = store
            .append_exercise_session(&workout.workout_id, new_session(Some("s1"), 1000))
            .await
            .unwrap();

        assert_eq!(first, retry);
        let history = store.list_workout_history("u1").await.unwrap();
        assert_eq!(history[0].exercise_sessions.len(), 1);
    }

    #[tokio::test]
    async fn same_tap_id_from_another_user_or_machine_is_a_new_exercise() {
        let store = InMemoryWorkoutStore::new();
        let alice = store.create_workout("alice", Utc::now()).await.unwrap();
        let bob = store.create_workout("bob", Utc::now()).await.unwrap();

        let mut alices = new_session(Some("session-143022"), 1000);
        alices.user_id = "alice".into();
        let stored_alice = store
            .append_exercise_session(&alice.workout_id, alices.clone())
            .await
            .unwrap();

        let mut bobs = new_session(Some("session-143022"), 1000);
        bobs.user_id = "bob".into();
        bobs.machine_id = "machine-007".into();
        let stored_bob = store
            .append_exercise_session(&bob.workout_id, bobs.clone())
            .await
            .unwrap();

        assert_ne!(stored_alice.session_id, stored_bob.session_id);
        assert_eq!(stored_bob.user_id, "bob");
        assert_eq!(stored_bob.workout_id, bob.workout_id);

        // Alice again on another machine with the same tag id.
        alices.machine_id = "machine-002".into();
        let other_machine = store
            .append_exercise_session(&alice.workout_id, alices)
            .await
            .unwrap();
        assert_ne!(other_machine.session_id, stored_alice.session_id);

        let bob_history = store.list_workout_history("bob").await.unwrap();
        assert_eq!(bob_history[0].exercise_sessions, vec![stored_bob]);
        let alice_history = store.list_workout_history("alice").await.unwrap();
        assert_eq!(alice_history[0].exercise_sessions.len(), 2);
    }

    #[tokio::test]
    async fn history_is_scoped_and_ordered() {
        let store = InMemoryWorkoutStore::new();
        let older = store
            .create_workout("u1", DateTime::from_timestamp(100, 0).unwrap())
            .await
            .unwrap();
        let newer = store
            .create_workout("u1", DateTime::from_timestamp(200, 0).unwrap())
            .await
            .unwrap();
        store.create_workout("u2", Utc::now()).await.unwrap();

        store
            .append_exercise_session(&newer.workout_id, new_session(None, 500))
            .await
            .unwrap();
        store
            .append_exercise_session(&newer.workout_id, new_session(None, 300))
            .await
            .unwrap();

        let history = store.list_workout_history("u1").await.unwrap();
        let ids: Vec<_> = history.iter().map(|w| w.workout_id.as_str()).collect();
        assert_eq!(ids, vec![newer.workout_id.as_str(), older.workout_id.as_str()]);

        let starts: Vec<_> = history[0]
            .exercise_sessions
            .iter()
            .map(|e| e.started_at.timestamp())
            .collect();
        assert_eq!(starts, vec![300, 500]);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = InMemoryWorkoutStore::new();
        let summary = WorkoutSummary::from_sessions(&[], Utc::now());

        assert!(matches!(
            store.complete_workout("missing", &summary).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            store
                .append_exercise_session("missing", new_session(None, 0))
                .await,
            Err(AppError::NotFound)
        ));
    }
}
