use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a tag read for duplicate detection.
///
/// Two reads with the same current slot and the same most recent prior slot
/// are the same physical tap seen twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadKey {
    pub current_session_id: String,
    pub latest_prior_id: Option<String>,
}

/// The tap session currently open on this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSession {
    /// The tag's id for the open session.
    pub session_id: String,
    /// The machine the session was opened on.
    pub machine_id: String,
    /// The machine name shown to the user.
    pub machine_label: String,
    /// When the timeout guard was last armed.
    pub armed_at: DateTime<Utc>,
}

/// A read-only view of the orchestrator's state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub active_session: Option<ActiveSession>,
    pub open_workout_id: Option<String>,
    pub session_timeout_ms: u64,
}
