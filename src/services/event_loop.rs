//! The per-user session event queue.
//!
//! Tag reads, guard expiries and user commands all become [`SessionEvent`]s
//! on one channel. A single task owns the [`SessionOrchestrator`] and drains
//! the channel in order, so a timeout can never land in the middle of a
//! reconciliation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{
    error::{AppError, Result},
    models::{
        session::{ActiveSession, SessionSnapshot},
        workout::{ExerciseSession, NewExerciseSession, WorkoutSession},
    },
    repositories::workout::WorkoutStore,
    services::{
        notifier::Notifier,
        orchestrator::{SessionOrchestrator, TapOutcome},
        timeout::TimeoutGuard,
    },
};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Work for the session task.
pub enum SessionEvent {
    /// Raw bytes from a tag read. `reply` is `None` for reads nobody waits on.
    TagDetected {
        raw: Vec<u8>,
        reply: Option<Reply<TapOutcome>>,
    },
    TimeoutExpired {
        session_id: String,
    },
    Cancel {
        reply: oneshot::Sender<Option<ActiveSession>>,
    },
    EndWorkout {
        reply: Reply<Option<WorkoutSession>>,
    },
    AddManualExercise {
        entry: NewExerciseSession,
        reply: Reply<ExerciseSession>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// A cloneable handle for queueing work on the session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

fn stopped() -> AppError {
    AppError::Internal("session task stopped".to_string())
}

impl SessionHandle {
    /// Queues a tag read without waiting for it to be handled.
    pub fn ingest(&self, raw: Vec<u8>) {
        if self
            .tx
            .send(SessionEvent::TagDetected { raw, reply: None })
            .is_err()
        {
            tracing::warn!("Tag read dropped: session task stopped");
        }
    }

    /// Queues a tag read and waits for its outcome.
    pub async fn submit(&self, raw: Vec<u8>) -> Result<TapOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::TagDetected {
            raw,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn cancel(&self) -> Result<Option<ActiveSession>> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Cancel { reply })?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn end_workout(&self) -> Result<Option<WorkoutSession>> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::EndWorkout { reply })?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn add_manual_exercise(&self, entry: NewExerciseSession) -> Result<ExerciseSession> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::AddManualExercise { entry, reply })?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Snapshot { reply })?;
        rx.await.map_err(|_| stopped())
    }

    fn send(&self, event: SessionEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| stopped())
    }
}

/// Starts the session task for one user.
///
/// The task first resumes any workout the store still has open, then handles
/// events one at a time until every [`SessionHandle`] is dropped.
///
/// # Arguments
///
/// * `user_id` - The user the session belongs to.
/// * `store` - The workout store.
/// * `notifier` - Where user-facing messages go.
/// * `session_timeout` - How long a tap session may stay open.
///
/// # Returns
///
/// The `SessionHandle` and the task's `JoinHandle`.
pub fn spawn(
    user_id: String,
    store: Arc<dyn WorkoutStore>,
    notifier: Arc<dyn Notifier>,
    session_timeout: Duration,
) -> (SessionHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let expiry_tx = tx.downgrade();
    let guard = TimeoutGuard::new(move |session_id| {
        if let Some(tx) = expiry_tx.upgrade() {
            let _ = tx.send(SessionEvent::TimeoutExpired { session_id });
        }
    });

    let mut orchestrator = SessionOrchestrator::new(user_id, store, notifier, guard, session_timeout);

    let task = tokio::spawn(async move {
        if let Err(e) = orchestrator.restore_open_workout().await {
            tracing::error!("❌ Failed to restore open workout: {}", e);
        }

        while let Some(event) = rx.recv().await {
            dispatch(&mut orchestrator, event).await;
        }
        tracing::debug!("Session task stopped");
    });

    (SessionHandle { tx }, task)
}

async fn dispatch(orchestrator: &mut SessionOrchestrator, event: SessionEvent) {
    match event {
        SessionEvent::TagDetected { raw, reply } => {
            let outcome = orchestrator.handle_incoming_payload(&raw).await;
            match reply {
                Some(reply) => {
                    let _ = reply.send(outcome);
                }
                None => {
                    if let Err(e) = outcome {
                        tracing::error!("❌ Tag read failed: {}", e);
                    }
                }
            }
        }
        SessionEvent::TimeoutExpired { session_id } => {
            orchestrator.handle_timeout(&session_id);
        }
        SessionEvent::Cancel { reply } => {
            let _ = reply.send(orchestrator.cancel_session());
        }
        SessionEvent::EndWorkout { reply } => {
            let _ = reply.send(orchestrator.end_workout().await);
        }
        SessionEvent::AddManualExercise { entry, reply } => {
            let _ = reply.send(orchestrator.add_manual_exercise(entry).await);
        }
        SessionEvent::Snapshot { reply } => {
            let _ = reply.send(orchestrator.snapshot());
        }
    }
}
