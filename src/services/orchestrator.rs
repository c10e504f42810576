use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::{
    error::{AppError, Result},
    models::{
        machine,
        session::{ActiveSession, PayloadKey, SessionSnapshot},
        tag::{self, RawTagPayload, SessionRecord},
        workout::{ExerciseSession, ExerciseSet, NewExerciseSession, WorkoutSession, WorkoutSummary},
    },
    repositories::workout::WorkoutStore,
    services::{
        notifier::Notifier,
        reconciler::{self, IgnoreReason, ReconciliationAction},
        timeout::{GuardHandle, TimeoutGuard},
    },
};

/// What handling one tag read did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TapOutcome {
    /// The bytes were not a usable payload; nothing changed.
    Rejected { reason: String },
    Ignored { reason: IgnoreReason },
    Started {
        session_id: String,
        workout_id: String,
    },
    /// `exercise` is `None` when the tag had no data for the session.
    Completed {
        session_id: String,
        exercise: Option<ExerciseSession>,
    },
    Restarted {
        abandoned_session_id: String,
        session_id: String,
        workout_id: String,
    },
}

/// Owns one user's tap-session state and applies reconciliation results.
///
/// Every method takes `&mut self`; callers serialize access through the
/// session event loop, so no two reconciliations ever interleave.
pub struct SessionOrchestrator {
    user_id: String,
    store: Arc<dyn WorkoutStore>,
    notifier: Arc<dyn Notifier>,
    guard: TimeoutGuard,
    session_timeout: Duration,
    active: Option<ActiveSession>,
    guard_handle: Option<GuardHandle>,
    last_key: Option<PayloadKey>,
    open_workout: Option<WorkoutSession>,
}

impl SessionOrchestrator {
    /// Creates a new `SessionOrchestrator` with no open session.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The authenticated user.
    /// * `store` - The workout store.
    /// * `notifier` - Where user-facing messages go.
    /// * `guard` - The timeout guard; its callback must route expiry back to
    ///   [`handle_timeout`](Self::handle_timeout) through the event loop.
    /// * `session_timeout` - How long a tap session may stay open.
    pub fn new(
        user_id: String,
        store: Arc<dyn WorkoutStore>,
        notifier: Arc<dyn Notifier>,
        guard: TimeoutGuard,
        session_timeout: Duration,
    ) -> Self {
        Self {
            user_id,
            store,
            notifier,
            guard,
            session_timeout,
            active: None,
            guard_handle: None,
            last_key: None,
            open_workout: None,
        }
    }

    pub fn active_session(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user_id: self.user_id.clone(),
            active_session: self.active.clone(),
            open_workout_id: self.open_workout.as_ref().map(|w| w.workout_id.clone()),
            session_timeout_ms: u64::try_from(self.session_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Picks up a workout left open by a previous run.
    pub async fn restore_open_workout(&mut self) -> Result<Option<String>> {
        let open = self.find_open_workout().await?;
        if let Some(workout) = &open {
            tracing::info!("♻️ Resuming open workout {}", workout.workout_id);
        }
        self.open_workout = open;
        Ok(self.open_workout.as_ref().map(|w| w.workout_id.clone()))
    }

    /// Handles the bytes of one tag read.
    ///
    /// Malformed input is reported to the user and yields
    /// `TapOutcome::Rejected` without touching any state. A store failure
    /// yields `PersistenceFailed` and leaves every piece of local state
    /// (active session, guard, duplicate key, open workout) as it was, so the
    /// same read can be retried.
    ///
    /// # Arguments
    ///
    /// * `raw` - The bytes read from the tag.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `TapOutcome`.
    pub async fn handle_incoming_payload(&mut self, raw: &[u8]) -> Result<TapOutcome> {
        let payload = match tag::parse(raw) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("❌ Rejected tag read: {}", e);
                self.notifier.notify("Invalid tag data");
                return Ok(TapOutcome::Rejected {
                    reason: e.to_string(),
                });
            }
        };

        let key = payload.key();
        let action = reconciler::classify(&payload, self.active.as_ref(), self.last_key.as_ref());
        tracing::debug!(
            "Tag {} on {} classified as {:?}",
            payload.current_session_id,
            payload.machine_id,
            action
        );

        let failure_message = match &action {
            ReconciliationAction::CompleteSession { .. } => "Failed to save workout data",
            _ => "Failed to start session",
        };

        let result = match action {
            ReconciliationAction::Ignore { reason } => {
                self.notifier.notify(&format!(
                    "Session already active on {}. Start working out!",
                    payload.machine_label()
                ));
                Ok(TapOutcome::Ignored { reason })
            }
            ReconciliationAction::StartSession { session_id } => {
                self.start_session(&payload, session_id).await
            }
            ReconciliationAction::CompleteSession { session_id, record } => {
                self.complete_session(&payload, session_id, record).await
            }
            ReconciliationAction::AbandonThenStart {
                old_session_id,
                new_session_id,
            } => {
                self.abandon_then_start(&payload, old_session_id, new_session_id)
                    .await
            }
        };

        match result {
            Ok(outcome) => {
                self.last_key = Some(key);
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("❌ Tag {} not applied: {}", payload.current_session_id, e);
                self.notifier.notify(failure_message);
                Err(e)
            }
        }
    }

    /// Handles expiry of the guard armed for `session_id`.
    ///
    /// # Returns
    ///
    /// `true` if the session was still open and has been cleared.
    pub fn handle_timeout(&mut self, session_id: &str) -> bool {
        match &self.active {
            Some(active) if active.session_id == session_id => {
                tracing::info!("⏰ Session timed out: {}", session_id);
                self.active = None;
                self.guard_handle = None;
                self.notifier.notify("Session timed out");
                true
            }
            _ => {
                tracing::debug!("Stale timeout for {} ignored", session_id);
                false
            }
        }
    }

    /// Drops the open tap session without recording anything.
    pub fn cancel_session(&mut self) -> Option<ActiveSession> {
        let cancelled = self.release_active();
        if let Some(session) = &cancelled {
            tracing::info!("🛑 Session cancelled: {}", session.session_id);
            self.notifier.notify("Session cancelled");
        }
        cancelled
    }

    /// Completes the open workout with its volume and set totals.
    ///
    /// # Returns
    ///
    /// A `Result` containing the completed workout, or `None` if no workout
    /// was open.
    pub async fn end_workout(&mut self) -> Result<Option<WorkoutSession>> {
        let cached = self.open_workout.as_ref().map(|w| w.workout_id.clone());
        let history = self.load_history().await?;

        let Some(mut workout) = history
            .into_iter()
            .find(|w| w.is_open() && cached.as_ref().is_none_or(|id| *id == w.workout_id))
        else {
            self.open_workout = None;
            return Ok(None);
        };

        let summary = WorkoutSummary::from_sessions(&workout.exercise_sessions, Utc::now());
        self.store
            .complete_workout(&workout.workout_id, &summary)
            .await
            .map_err(|e| AppError::persistence("complete workout", e))?;

        workout.ended_at = Some(summary.ended_at);
        workout.total_volume = Some(summary.total_volume);
        workout.total_sets = Some(summary.total_sets);
        self.open_workout = None;

        tracing::info!("🏁 Workout {} completed", workout.workout_id);
        self.notifier.notify(&format!(
            "Workout complete: {} sets, {:.0} lbs total",
            summary.total_sets, summary.total_volume
        ));
        Ok(Some(workout))
    }

    /// Appends a manually entered exercise to the open workout, opening one
    /// if needed.
    pub async fn add_manual_exercise(&mut self, entry: NewExerciseSession) -> Result<ExerciseSession> {
        let (workout_id, resolved) = self.resolve_open_workout().await?;
        let exercise = self
            .store
            .append_exercise_session(&workout_id, entry)
            .await
            .map_err(|e| AppError::persistence("append manual exercise", e))?;
        self.cache_open_workout(resolved);

        self.notifier.notify(&format!(
            "Added {}: {} sets",
            machine::display_name(&exercise.machine_id, exercise.machine_name.as_deref()),
            exercise.sets.len()
        ));
        Ok(exercise)
    }

    async fn start_session(&mut self, payload: &RawTagPayload, session_id: String) -> Result<TapOutcome> {
        let (workout_id, resolved) = self.resolve_open_workout().await?;
        self.cache_open_workout(resolved);
        self.activate(payload, session_id.clone());

        Ok(TapOutcome::Started {
            session_id,
            workout_id,
        })
    }

    async fn complete_session(
        &mut self,
        payload: &RawTagPayload,
        session_id: String,
        record: Option<SessionRecord>,
    ) -> Result<TapOutcome> {
        let Some(record) = record.filter(|r| !r.sets.is_empty()) else {
            self.release_active();
            tracing::info!("Session {} closed without data", session_id);
            self.notifier.notify("No workout data recorded");
            return Ok(TapOutcome::Completed {
                session_id,
                exercise: None,
            });
        };

        let (workout_id, resolved) = self.resolve_open_workout().await?;
        let entry = NewExerciseSession {
            user_id: self.user_id.clone(),
            machine_id: payload.machine_id.clone(),
            machine_type: payload.machine_type.clone(),
            machine_name: payload.machine_name.clone(),
            tap_session_id: Some(session_id.clone()),
            started_at: record.started_at()?,
            ended_at: record.ended_at()?,
            sets: record.sets.iter().map(ExerciseSet::from).collect(),
        };

        let exercise = self
            .store
            .append_exercise_session(&workout_id, entry)
            .await
            .map_err(|e| AppError::persistence("append exercise session", e))?;

        self.cache_open_workout(resolved);
        self.release_active();
        tracing::info!("✅ Session {} saved as exercise {}", session_id, exercise.session_id);
        self.notifier.notify(&format!(
            "Saved workout: {} sets on {}",
            exercise.sets.len(),
            payload.machine_label()
        ));

        Ok(TapOutcome::Completed {
            session_id,
            exercise: Some(exercise),
        })
    }

    async fn abandon_then_start(
        &mut self,
        payload: &RawTagPayload,
        old_session_id: String,
        new_session_id: String,
    ) -> Result<TapOutcome> {
        let (workout_id, resolved) = self.resolve_open_workout().await?;

        self.cache_open_workout(resolved);
        self.release_active();
        tracing::warn!("⚠️ Abandoning session {} without data", old_session_id);
        self.notifier.notify("Previous session abandoned");
        self.activate(payload, new_session_id.clone());

        Ok(TapOutcome::Restarted {
            abandoned_session_id: old_session_id,
            session_id: new_session_id,
            workout_id,
        })
    }

    fn activate(&mut self, payload: &RawTagPayload, session_id: String) {
        let handle = self.guard.arm(&session_id, self.session_timeout);
        self.guard_handle = Some(handle);

        tracing::info!("▶️ Session {} started on {}", session_id, payload.machine_id);
        self.active = Some(ActiveSession {
            session_id,
            machine_id: payload.machine_id.clone(),
            machine_label: payload.machine_label().to_string(),
            armed_at: Utc::now(),
        });

        self.notifier
            .notify(&format!("Started session on {}", payload.machine_label()));
    }

    fn release_active(&mut self) -> Option<ActiveSession> {
        if let Some(handle) = self.guard_handle.take() {
            self.guard.disarm(&handle);
        }
        self.active.take()
    }

    /// Finds the workout new exercises go into, creating one if none is open.
    ///
    /// Nothing is cached here. The second element is a workout that was not
    /// cached yet; hand it to [`cache_open_workout`](Self::cache_open_workout)
    /// once the caller's own store writes have succeeded.
    async fn resolve_open_workout(&self) -> Result<(String, Option<WorkoutSession>)> {
        if let Some(workout) = &self.open_workout {
            return Ok((workout.workout_id.clone(), None));
        }

        if let Some(workout) = self.find_open_workout().await? {
            return Ok((workout.workout_id.clone(), Some(workout)));
        }

        let workout = self
            .store
            .create_workout(&self.user_id, Utc::now())
            .await
            .map_err(|e| AppError::persistence("create workout", e))?;

        tracing::info!("🏋️ Workout {} opened for {}", workout.workout_id, self.user_id);
        Ok((workout.workout_id.clone(), Some(workout)))
    }

    fn cache_open_workout(&mut self, resolved: Option<WorkoutSession>) {
        if let Some(workout) = resolved {
            self.open_workout = Some(workout);
        }
    }

    async fn find_open_workout(&self) -> Result<Option<WorkoutSession>> {
        Ok(self.load_history().await?.into_iter().find(WorkoutSession::is_open))
    }

    async fn load_history(&self) -> Result<Vec<WorkoutSession>> {
        self.store
            .list_workout_history(&self.user_id)
            .await
            .map_err(|e| AppError::persistence("list workout history", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::InMemoryWorkoutStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }

        fn last(&self) -> Option<String> {
            self.messages.lock().unwrap().last().cloned()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    /// Delegates to an in-memory store but can be told to reject writes.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryWorkoutStore,
        failing: AtomicBool,
        failing_appends: AtomicBool,
    }

    impl FlakyStore {
        fn fail_writes(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn fail_appends(&self, failing: bool) {
            self.failing_appends.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(AppError::Internal("store offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl WorkoutStore for FlakyStore {
        async fn create_workout(
            &self,
            user_id: &str,
            started_at: DateTime<Utc>,
        ) -> Result<WorkoutSession> {
            self.check()?;
            self.inner.create_workout(user_id, started_at).await
        }

        async fn complete_workout(&self, workout_id: &str, summary: &WorkoutSummary) -> Result<()> {
            self.check()?;
            self.inner.complete_workout(workout_id, summary).await
        }

        async fn append_exercise_session(
            &self,
            workout_id: &str,
            session: NewExerciseSession,
        ) -> Result<ExerciseSession> {
            self.check()?;
            if self.failing_appends.load(Ordering::SeqCst) {
                return Err(AppError::Internal("append rejected".to_string()));
            }
            self.inner.append_exercise_session(workout_id, session).await
        }

        async fn list_workout_history(&self, user_id: &str) -> Result<Vec<WorkoutSession>> {
            self.inner.list_workout_history(user_id).await
        }

        async fn replace_exercise_session(&self, session: ExerciseSession) -> Result<ExerciseSession> {
            self.check()?;
            self.inner.replace_exercise_session(session).await
        }
    }

    struct Harness {
        orchestrator: SessionOrchestrator,
        store: Arc<FlakyStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let store = Arc::new(FlakyStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = SessionOrchestrator::new(
            "u1".to_string(),
            store.clone(),
            notifier.clone(),
            TimeoutGuard::new(|_| {}),
            Duration::from_secs(600),
        );
        Harness {
            orchestrator,
            store,
            notifier,
        }
    }

    const TAP_IN_S1: &str = r#"{"machineId":"machine-001","machineName":"Lat Pulldown",
        "machineType":"cable_stack","currentSessionId":"s1"}"#;

    const TAP_OUT_S1: &str = r#"{"machineId":"machine-001","machineName":"Lat Pulldown",
        "machineType":"cable_stack","currentSessionId":"s2","priorSessionIds":["s1"],
        "priorSessionData":{"s1":{"sets":[{"weightLbs":90,"reps":10,"durationMs":30000}],
        "startedAtUnix":1000,"endedAtUnix":1030}}}"#;

    #[tokio::test]
    async fn tap_in_then_tap_out_persists_the_exercise() {
        let mut h = harness();

        let started = h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();
        assert!(matches!(started, TapOutcome::Started { ref session_id, .. } if session_id == "s1"));
        assert_eq!(h.orchestrator.active_session().unwrap().session_id, "s1");
        assert_eq!(h.notifier.last().as_deref(), Some("Started session on Lat Pulldown"));

        let completed = h.orchestrator.handle_incoming_payload(TAP_OUT_S1.as_bytes()).await.unwrap();
        let TapOutcome::Completed { session_id, exercise: Some(exercise) } = completed else {
            panic!("expected a saved exercise, got {:?}", completed);
        };
        assert_eq!(session_id, "s1");
        assert_eq!(exercise.tap_session_id.as_deref(), Some("s1"));
        assert_eq!(exercise.started_at.timestamp(), 1000);
        assert_eq!(exercise.ended_at.timestamp(), 1030);
        assert_eq!(exercise.sets.len(), 1);
        assert!(h.orchestrator.active_session().is_none());
        assert_eq!(
            h.notifier.last().as_deref(),
            Some("Saved workout: 1 sets on Lat Pulldown")
        );

        let history = h.store.list_workout_history("u1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].exercise_sessions, vec![exercise]);
    }

    #[tokio::test]
    async fn re_read_of_the_same_tap_is_ignored() {
        let mut h = harness();
        h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();

        let again = h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();

        assert_eq!(again, TapOutcome::Ignored { reason: IgnoreReason::Duplicate });
        assert_eq!(
            h.notifier.last().as_deref(),
            Some("Session already active on Lat Pulldown. Start working out!")
        );
        assert_eq!(h.orchestrator.active_session().unwrap().session_id, "s1");
    }

    #[tokio::test]
    async fn malformed_payload_changes_nothing() {
        let mut h = harness();
        h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();
        let before = h.orchestrator.snapshot();

        let outcome = h.orchestrator.handle_incoming_payload(b"\x00garbage").await.unwrap();

        assert!(matches!(outcome, TapOutcome::Rejected { .. }));
        assert_eq!(h.notifier.last().as_deref(), Some("Invalid tag data"));
        assert_eq!(h.orchestrator.snapshot().active_session, before.active_session);

        // The duplicate slot still holds the tap-in.
        let again = h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();
        assert!(matches!(again, TapOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn forgotten_tap_out_abandons_and_restarts() {
        let mut h = harness();
        h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();

        let other_machine = r#"{"machineId":"machine-003","machineName":"Chest Press",
            "currentSessionId":"c9","priorSessionIds":["x1"]}"#;
        let outcome = h.orchestrator.handle_incoming_payload(other_machine.as_bytes()).await.unwrap();

        assert!(matches!(
            outcome,
            TapOutcome::Restarted { ref abandoned_session_id, ref session_id, .. }
                if abandoned_session_id == "s1" && session_id == "c9"
        ));
        assert_eq!(h.orchestrator.active_session().unwrap().session_id, "c9");
        let messages = h.notifier.messages();
        assert!(messages.ends_with(&[
            "Previous session abandoned".to_string(),
            "Started session on Chest Press".to_string(),
        ]));

        // Nothing was persisted for s1 or for the unrelated prior slot.
        let history = h.store.list_workout_history("u1").await.unwrap();
        assert!(history[0].exercise_sessions.is_empty());
    }

    #[tokio::test]
    async fn evicted_data_clears_session_without_persisting() {
        let mut h = harness();
        let tap_in = r#"{"machineId":"m1","currentSessionId":"s_d"}"#;
        h.orchestrator.handle_incoming_payload(tap_in.as_bytes()).await.unwrap();

        let tap_out = r#"{"machineId":"m1","currentSessionId":"s_a",
            "priorSessionIds":["s_b","s_c","s_d"],
            "priorSessionData":{
                "s_b":{"startedAtUnix":1,"endedAtUnix":2,"sets":[{"weightLbs":5,"reps":5,"durationMs":5}]},
                "s_c":{"startedAtUnix":1,"endedAtUnix":2,"sets":[{"weightLbs":5,"reps":5,"durationMs":5}]}}}"#;
        let outcome = h.orchestrator.handle_incoming_payload(tap_out.as_bytes()).await.unwrap();

        assert_eq!(
            outcome,
            TapOutcome::Completed { session_id: "s_d".into(), exercise: None }
        );
        assert!(h.orchestrator.active_session().is_none());
        assert_eq!(h.notifier.last().as_deref(), Some("No workout data recorded"));
        let history = h.store.list_workout_history("u1").await.unwrap();
        assert!(history[0].exercise_sessions.is_empty());
    }

    #[tokio::test]
    async fn start_reuses_the_open_workout() {
        let mut h = harness();
        h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();
        h.orchestrator.handle_incoming_payload(TAP_OUT_S1.as_bytes()).await.unwrap();

        let next = r#"{"machineId":"machine-001","currentSessionId":"s3","priorSessionIds":["s2","s1"]}"#;
        h.orchestrator.handle_incoming_payload(next.as_bytes()).await.unwrap();

        let history = h.store.list_workout_history("u1").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn restores_workout_left_open_by_a_previous_run() {
        let mut h = harness();
        let open = h.store.create_workout("u1", Utc::now()).await.unwrap();

        let restored = h.orchestrator.restore_open_workout().await.unwrap();
        assert_eq!(restored, Some(open.workout_id.clone()));

        let outcome = h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();
        assert!(matches!(outcome, TapOutcome::Started { ref workout_id, .. } if *workout_id == open.workout_id));
    }

    #[tokio::test]
    async fn failed_start_leaves_state_untouched_and_retry_succeeds() {
        let mut h = harness();
        h.store.fail_writes(true);

        let err = h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap_err();
        assert!(matches!(err, AppError::PersistenceFailed(_)));
        assert!(h.orchestrator.active_session().is_none());
        assert_eq!(h.notifier.last().as_deref(), Some("Failed to start session"));

        h.store.fail_writes(false);
        let retry = h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();
        assert!(matches!(retry, TapOutcome::Started { .. }));
    }

    #[tokio::test]
    async fn failed_tap_out_keeps_the_session_open() {
        let mut h = harness();
        h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();
        let before = h.orchestrator.snapshot();

        h.store.fail_writes(true);
        let err = h.orchestrator.handle_incoming_payload(TAP_OUT_S1.as_bytes()).await.unwrap_err();
        assert!(matches!(err, AppError::PersistenceFailed(_)));
        assert_eq!(h.orchestrator.snapshot().active_session, before.active_session);
        assert!(h.orchestrator.guard_handle.as_ref().is_some_and(|g| h.orchestrator.guard.is_pending(g)));
        assert_eq!(h.notifier.last().as_deref(), Some("Failed to save workout data"));

        h.store.fail_writes(false);
        let retry = h.orchestrator.handle_incoming_payload(TAP_OUT_S1.as_bytes()).await.unwrap();
        assert!(matches!(retry, TapOutcome::Completed { exercise: Some(_), .. }));
        assert!(h.orchestrator.active_session().is_none());
    }

    #[tokio::test]
    async fn timeout_clears_only_the_matching_session() {
        let mut h = harness();
        h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();

        assert!(!h.orchestrator.handle_timeout("someone-else"));
        assert!(h.orchestrator.active_session().is_some());

        assert!(h.orchestrator.handle_timeout("s1"));
        assert!(h.orchestrator.active_session().is_none());
        assert_eq!(h.notifier.last().as_deref(), Some("Session timed out"));

        // A late expiry after the session is gone is a no-op.
        assert!(!h.orchestrator.handle_timeout("s1"));
    }

    #[tokio::test]
    async fn cancel_drops_the_session() {
        let mut h = harness();
        assert!(h.orchestrator.cancel_session().is_none());

        h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();
        let cancelled = h.orchestrator.cancel_session().unwrap();

        assert_eq!(cancelled.session_id, "s1");
        assert!(h.orchestrator.active_session().is_none());
        assert_eq!(h.notifier.last().as_deref(), Some("Session cancelled"));
    }

    #[tokio::test]
    async fn end_workout_records_totals() {
        let mut h = harness();
        assert_eq!(h.orchestrator.end_workout().await.unwrap(), None);

        h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();
        h.orchestrator.handle_incoming_payload(TAP_OUT_S1.as_bytes()).await.unwrap();

        let workout = h.orchestrator.end_workout().await.unwrap().unwrap();
        assert_eq!(workout.total_sets, Some(1));
        assert_eq!(workout.total_volume, Some(900.0));
        assert!(workout.ended_at.is_some());
        assert_eq!(h.orchestrator.snapshot().open_workout_id, None);

        let history = h.store.list_workout_history("u1").await.unwrap();
        assert!(!history[0].is_open());
    }

    fn bench_press() -> NewExerciseSession {
        NewExerciseSession {
            user_id: "u1".into(),
            machine_id: machine::manual_machine_id("Bench Press"),
            machine_type: Some(machine::MANUAL_MACHINE_TYPE.into()),
            machine_name: Some("Bench Press".into()),
            tap_session_id: None,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            sets: vec![ExerciseSet { weight_lbs: 135.0, reps: 5, duration_ms: 20_000 }],
        }
    }

    #[tokio::test]
    async fn manual_exercise_opens_a_workout() {
        let mut h = harness();

        let exercise = h.orchestrator.add_manual_exercise(bench_press()).await.unwrap();

        assert_eq!(exercise.machine_id, "manual-bench-press");
        assert_eq!(h.notifier.last().as_deref(), Some("Added Bench Press: 1 sets"));
        assert!(h.orchestrator.snapshot().open_workout_id.is_some());
    }

    #[tokio::test]
    async fn failed_append_does_not_cache_the_workout() {
        let mut h = harness();
        let stored = h.store.create_workout("u1", Utc::now()).await.unwrap();
        h.store.fail_appends(true);

        // Found in the store but never written to.
        let err = h.orchestrator.add_manual_exercise(bench_press()).await.unwrap_err();
        assert!(matches!(err, AppError::PersistenceFailed(_)));
        assert_eq!(h.orchestrator.snapshot().open_workout_id, None);

        h.store.fail_appends(false);
        let exercise = h.orchestrator.add_manual_exercise(bench_press()).await.unwrap();
        assert_eq!(exercise.workout_id, stored.workout_id);
        assert_eq!(h.orchestrator.snapshot().open_workout_id, Some(stored.workout_id));
    }

    #[tokio::test]
    async fn failed_tap_out_after_ending_the_workout_caches_nothing() {
        let mut h = harness();
        h.orchestrator.handle_incoming_payload(TAP_IN_S1.as_bytes()).await.unwrap();
        h.orchestrator.end_workout().await.unwrap();
        assert_eq!(h.orchestrator.snapshot().open_workout_id, None);

        // Step 1: The tap-out creates a workout but the append fails
        h.store.fail_appends(true);
        let err = h.orchestrator.handle_incoming_payload(TAP_OUT_S1.as_bytes()).await.unwrap_err();
        assert!(matches!(err, AppError::PersistenceFailed(_)));
        let snapshot = h.orchestrator.snapshot();
        assert_eq!(snapshot.open_workout_id, None);
        assert_eq!(snapshot.active_session.unwrap().session_id, "s1");

        // Step 2: The retry lands in the workout the failed attempt created
        h.store.fail_appends(false);
        let retry = h.orchestrator.handle_incoming_payload(TAP_OUT_S1.as_bytes()).await.unwrap();
        let TapOutcome::Completed { exercise: Some(exercise), .. } = retry else {
            panic!("expected a saved exercise, got {:?}", retry);
        };
        let history = h.store.list_workout_history("u1").await.unwrap();
        assert_eq!(history.len(), 2);
        let open: Vec<_> = history.iter().filter(|w| w.is_open()).collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].workout_id, exercise.workout_id);
        assert_eq!(h.orchestrator.snapshot().open_workout_id, Some(exercise.workout_id));
    }
}
