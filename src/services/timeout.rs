use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// How long a tap session may stay open before it is dropped.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(600_000);

/// Invoked with the session id when a guard expires.
pub type ExpiryCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Identifies one arming of a [`TimeoutGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardHandle {
    token: u64,
    session_id: String,
}

impl GuardHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// A single-shot, cancellable session timer.
///
/// At most one arming is pending at a time. Expiry and [`disarm`] race on a
/// single token slot with compare-and-clear, so for any arming exactly one of
/// them wins: either the callback runs once, or `disarm` returns `true`.
///
/// [`disarm`]: TimeoutGuard::disarm
pub struct TimeoutGuard {
    pending: Arc<Mutex<Option<u64>>>,
    task: Option<JoinHandle<()>>,
    next_token: u64,
    on_expiry: ExpiryCallback,
}

fn lock(slot: &Mutex<Option<u64>>) -> MutexGuard<'_, Option<u64>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears `slot` if it still holds `token`.
fn take_if_current(slot: &Mutex<Option<u64>>, token: u64) -> bool {
    let mut current = lock(slot);
    if *current == Some(token) {
        *current = None;
        true
    } else {
        false
    }
}

impl TimeoutGuard {
    /// Creates an idle guard that reports expiry through `on_expiry`.
    pub fn new<F>(on_expiry: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Self {
            pending: Arc::new(Mutex::new(None)),
            task: None,
            next_token: 0,
            on_expiry: Arc::new(on_expiry),
        }
    }

    /// Arms the guard for `session_id`, disarming any pending arming first.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session the guard protects.
    /// * `duration` - How long until expiry.
    ///
    /// # Returns
    ///
    /// The `GuardHandle` to disarm this arming with.
    pub fn arm(&mut self, session_id: &str, duration: Duration) -> GuardHandle {
        self.cancel_pending();

        self.next_token += 1;
        let token = self.next_token;
        *lock(&self.pending) = Some(token);

        let pending = Arc::clone(&self.pending);
        let on_expiry = Arc::clone(&self.on_expiry);
        let expired_id = session_id.to_string();

        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if take_if_current(&pending, token) {
                tracing::debug!("⏰ Session guard expired for {}", expired_id);
                on_expiry(expired_id);
            }
        }));

        tracing::debug!("Session guard armed for {} ({:?})", session_id, duration);
        GuardHandle {
            token,
            session_id: session_id.to_string(),
        }
    }

    /// Disarms the arming identified by `handle`.
    ///
    /// # Returns
    ///
    /// `true` if the arming was still pending and will now never fire;
    /// `false` if it already fired or was superseded.
    pub fn disarm(&mut self, handle: &GuardHandle) -> bool {
        let cleared = take_if_current(&self.pending, handle.token);
        if cleared {
            if let Some(task) = self.task.take() {
                task.abort();
            }
            tracing::debug!("Session guard disarmed for {}", handle.session_id);
        }
        cleared
    }

    /// Whether the arming identified by `handle` can still fire.
    pub fn is_pending(&self, handle: &GuardHandle) -> bool {
        *lock(&self.pending) == Some(handle.token)
    }

    fn cancel_pending(&mut self) {
        *lock(&self.pending) = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
