//! Classification of a tag read against the locally open tap session.
//!
//! `classify` is a pure function: it holds nothing between calls. The
//! caller owns the active session and the key of the previous read.

use serde::Serialize;

use crate::models::{
    session::{ActiveSession, PayloadKey},
    tag::{RawTagPayload, SessionRecord},
};

/// Why a read was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The same tap was read again while the tag stayed in range.
    Duplicate,
}

/// What the orchestrator should do with a tag read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationAction {
    Ignore {
        reason: IgnoreReason,
    },
    /// Open a session with no prior local session.
    StartSession {
        session_id: String,
    },
    /// The active session was tapped out. `record` is `None` when its data
    /// was evicted from the tag or never recorded.
    CompleteSession {
        session_id: String,
        record: Option<SessionRecord>,
    },
    /// The active session never showed up as completed; drop it and open
    /// the new one.
    AbandonThenStart {
        old_session_id: String,
        new_session_id: String,
    },
}

/// Classifies a tag read. The first matching rule wins:
///
/// 1. same key as the previous read: `Ignore`
/// 2. active id among the prior slots with data: `CompleteSession` with it
/// 3. active id among the prior slots without data: `CompleteSession` without
/// 4. active id absent from the prior slots: `AbandonThenStart`
/// 5. nothing active: `StartSession`
///
/// Prior slots that do not match the active session belong to other users
/// and are never acted on here.
///
/// # Arguments
///
/// * `payload` - The parsed tag read.
/// * `active` - The locally open session, if any.
/// * `previous_key` - The key of the previous successfully handled read.
///
/// # Returns
///
/// The `ReconciliationAction` to apply.
pub fn classify(
    payload: &RawTagPayload,
    active: Option<&ActiveSession>,
    previous_key: Option<&PayloadKey>,
) -> ReconciliationAction {
    if previous_key.is_some_and(|key| *key == payload.key()) {
        return ReconciliationAction::Ignore {
            reason: IgnoreReason::Duplicate,
        };
    }

    let Some(active) = active else {
        return ReconciliationAction::StartSession {
            session_id: payload.current_session_id.clone(),
        };
    };

    match payload.prior_position(&active.session_id) {
        Some(_) => ReconciliationAction::CompleteSession {
            session_id: active.session_id.clone(),
            record: payload.prior_record(&active.session_id).cloned(),
        },
        None => ReconciliationAction::AbandonThenStart {
            old_session_id: active.session_id.clone(),
            new_session_id: payload.current_session_id.clone(),
        },
    }
}
