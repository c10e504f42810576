use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::session::PayloadKey;

/// The maximum number of completed sessions a tag keeps ids for.
pub const MAX_PRIOR_SLOTS: usize = 3;

/// One set recorded by the machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetRecord {
    /// The weight lifted, in pounds.
    #[serde(rename = "weightLbs", alias = "weight_lbs")]
    pub weight_lbs: f64,
    /// The number of repetitions.
    pub reps: u32,
    /// How long the set took, in milliseconds.
    #[serde(rename = "durationMs", alias = "duration_ms")]
    pub duration_ms: u64,
}

/// A completed tap session as recorded on the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unix seconds at tap-in.
    #[serde(rename = "startedAtUnix", alias = "start_time")]
    pub started_at_unix: i64,
    /// Unix seconds at tap-out.
    #[serde(rename = "endedAtUnix", alias = "end_time")]
    pub ended_at_unix: i64,
    /// The sets performed, in order.
    pub sets: Vec<SetRecord>,
}

impl SessionRecord {
    /// The tap-in time.
    pub fn started_at(&self) -> Result<DateTime<Utc>> {
        unix_to_utc(self.started_at_unix)
    }

    /// The tap-out time.
    pub fn ended_at(&self) -> Result<DateTime<Utc>> {
        unix_to_utc(self.ended_at_unix)
    }

    fn validate(&self, session_id: &str) -> Result<()> {
        self.started_at()?;
        self.ended_at()?;

        if self.ended_at_unix < self.started_at_unix {
            return Err(AppError::MalformedPayload(format!(
                "session {} ends before it starts",
                session_id
            )));
        }

        if let Some(set) = self.sets.iter().find(|s| s.weight_lbs < 0.0 || !s.weight_lbs.is_finite()) {
            return Err(AppError::MalformedPayload(format!(
                "session {} has an invalid weight: {}",
                session_id, set.weight_lbs
            )));
        }

        Ok(())
    }
}

/// A parsed, structurally validated tag payload.
///
/// Fields the tag did not carry stay `None`; nothing is defaulted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTagPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    pub machine_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercise_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercise_name: Option<String>,
    /// The session the tap that produced this read belongs to.
    pub current_session_id: String,
    /// Sessions completed before this tap, most recent first.
    pub prior_session_ids: Vec<String>,
    /// Recorded data for the prior sessions that fit on the tag.
    pub prior_session_data: HashMap<String, SessionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

impl RawTagPayload {
    /// The name shown to the user for this machine.
    pub fn machine_label(&self) -> &str {
        self.machine_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.machine_id)
    }

    /// The duplicate-detection key of this read.
    pub fn key(&self) -> PayloadKey {
        PayloadKey {
            current_session_id: self.current_session_id.clone(),
            latest_prior_id: self.prior_session_ids.first().cloned(),
        }
    }

    /// Position of `session_id` among the prior slots, first occurrence wins.
    pub fn prior_position(&self, session_id: &str) -> Option<usize> {
        self.prior_session_ids.iter().position(|id| id == session_id)
    }

    /// The recorded data for a prior session, if it survived on the tag.
    pub fn prior_record(&self, session_id: &str) -> Option<&SessionRecord> {
        self.prior_session_data.get(session_id)
    }
}

/// Every field any supported tag layout may carry.
///
/// Three layouts are recognised, checked in this order:
/// - `currentSessionId` / `priorSessionIds` / `priorSessionData`
/// - firmware slots `session_id_a`..`session_id_d` with `session_data_b`..`session_data_d`
/// - the two-id `session_id_tap_in` / `session_id_tap_out` / `session_data`
#[derive(Debug, Deserialize)]
struct WireTag {
    #[serde(default, alias = "v")]
    version: Option<i64>,
    #[serde(default, rename = "machineId", alias = "machine_id")]
    machine_id: Option<String>,
    #[serde(default, rename = "machineName", alias = "machine_name")]
    machine_name: Option<String>,
    #[serde(default, rename = "machineType", alias = "machine_type")]
    machine_type: Option<String>,
    #[serde(default, rename = "exerciseId", alias = "exercise_id")]
    exercise_id: Option<String>,
    #[serde(default, rename = "exerciseName", alias = "exercise_name")]
    exercise_name: Option<String>,
    #[serde(default, rename = "firmwareVersion", alias = "fw")]
    firmware_version: Option<String>,

    #[serde(default, rename = "currentSessionId")]
    current_session_id: Option<String>,
    #[serde(default, rename = "priorSessionIds")]
    prior_session_ids: Option<Vec<String>>,
    #[serde(default, rename = "priorSessionData")]
    prior_session_data: Option<HashMap<String, SessionRecord>>,

    #[serde(default)]
    session_id_a: Option<String>,
    #[serde(default)]
    session_id_b: Option<String>,
    #[serde(default)]
    session_id_c: Option<String>,
    #[serde(default)]
    session_id_d: Option<String>,
    #[serde(default)]
    session_data_b: Option<SessionRecord>,
    #[serde(default)]
    session_data_c: Option<SessionRecord>,
    #[serde(default)]
    session_data_d: Option<SessionRecord>,

    #[serde(default)]
    session_id_tap_in: Option<String>,
    #[serde(default)]
    session_id_tap_out: Option<String>,
    #[serde(default)]
    session_data: Option<SessionRecord>,
}

/// Session slots normalized from any layout, before validation.
struct Slots {
    current: Option<String>,
    priors: Vec<(String, Option<SessionRecord>)>,
}

impl WireTag {
    fn take_slots(&mut self) -> Slots {
        if self.current_session_id.is_some() {
            let mut data = self.prior_session_data.take().unwrap_or_default();
            let priors = self
                .prior_session_ids
                .take()
                .unwrap_or_default()
                .into_iter()
                .map(|id| {
                    let record = data.remove(&id);
                    (id, record)
                })
                .collect();

            return Slots {
                current: self.current_session_id.take(),
                priors,
            };
        }

        if self.session_id_a.is_some() {
            let slots = [
                (self.session_id_b.take(), self.session_data_b.take()),
                (self.session_id_c.take(), self.session_data_c.take()),
                (self.session_id_d.take(), self.session_data_d.take()),
            ];

            return Slots {
                current: self.session_id_a.take(),
                priors: slots
                    .into_iter()
                    .filter_map(|(id, record)| id.map(|id| (id, record)))
                    .collect(),
            };
        }

        let priors = self
            .session_id_tap_out
            .take()
            .map(|id| vec![(id, self.session_data.take())])
            .unwrap_or_default();

        Slots {
            current: self.session_id_tap_in.take(),
            priors,
        }
    }
}

/// Parses the bytes read from a tag.
///
/// Accepts bare JSON or JSON wrapped in an NDEF Text record. Fails with
/// `MalformedPayload` when the bytes are not JSON, when `machineId` or the
/// current session id is missing or empty, or when more than
/// [`MAX_PRIOR_SLOTS`] prior ids are present. An internally inconsistent
/// session record is dropped with a warning; its id stays in the prior slots.
///
/// # Arguments
///
/// * `raw` - The bytes read from the tag.
///
/// # Returns
///
/// A `Result` containing the `RawTagPayload`.
pub fn parse(raw: &[u8]) -> Result<RawTagPayload> {
    let json = if looks_like_json(raw) {
        raw
    } else {
        unwrap_ndef_text(raw)?
    };

    let mut wire: WireTag = sonic_rs::from_slice(json)
        .map_err(|e| AppError::MalformedPayload(format!("invalid JSON: {}", e)))?;

    let machine_id = wire
        .machine_id
        .take()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::MalformedPayload("missing machineId".to_string()))?;

    let slots = wire.take_slots();

    let current_session_id = match slots.current {
        Some(id) if !id.is_empty() => id,
        Some(_) => {
            return Err(AppError::MalformedPayload(
                "currentSessionId is empty".to_string(),
            ));
        }
        None => {
            return Err(AppError::MalformedPayload(
                "missing currentSessionId".to_string(),
            ));
        }
    };

    let slots: Vec<_> = slots
        .priors
        .into_iter()
        .filter(|(id, _)| !id.is_empty())
        .collect();

    if slots.len() > MAX_PRIOR_SLOTS {
        return Err(AppError::MalformedPayload(format!(
            "{} prior session ids exceed the {} tag slots",
            slots.len(),
            MAX_PRIOR_SLOTS
        )));
    }

    let mut prior_session_ids = Vec::with_capacity(slots.len());
    let mut prior_session_data = HashMap::new();

    for (id, record) in slots {
        let first_occurrence = !prior_session_ids.contains(&id);
        if first_occurrence {
            match record.map(|r| r.validate(&id).map(|()| r)) {
                Some(Ok(record)) => {
                    prior_session_data.insert(id.clone(), record);
                }
                Some(Err(e)) => tracing::warn!("Dropping unusable slot data: {}", e),
                None => {}
            }
        } else {
            tracing::warn!("Tag repeats prior session id {}; keeping first slot", id);
        }
        prior_session_ids.push(id);
    }

    Ok(RawTagPayload {
        version: wire.version,
        machine_id,
        machine_name: wire.machine_name,
        machine_type: wire.machine_type,
        exercise_id: wire.exercise_id,
        exercise_name: wire.exercise_name,
        current_session_id,
        prior_session_ids,
        prior_session_data,
        firmware_version: wire.firmware_version,
    })
}

fn looks_like_json(raw: &[u8]) -> bool {
    raw.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

/// Strips the status byte and language code from an NDEF Text record payload.
///
/// # Arguments
///
/// * `record` - The payload of a well-known `T` record.
///
/// # Returns
///
/// A `Result` containing the UTF-8 text bytes.
pub fn unwrap_ndef_text(record: &[u8]) -> Result<&[u8]> {
    let (status, rest) = record
        .split_first()
        .ok_or_else(|| AppError::MalformedPayload("empty tag record".to_string()))?;

    if status & 0x80 != 0 {
        return Err(AppError::MalformedPayload(
            "UTF-16 text records are not supported".to_string(),
        ));
    }

    let language_len = usize::from(status & 0x3f);
    rest.get(language_len..)
        .ok_or_else(|| AppError::MalformedPayload("truncated text record".to_string()))
}

/// Converts unix seconds into a UTC timestamp.
pub fn unix_to_utc(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        AppError::MalformedPayload(format!("timestamp {} is out of range", seconds))
    })
}
