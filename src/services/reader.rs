use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use crate::{
    error::{AppError, Result},
    models::tag::{MAX_PRIOR_SLOTS, RawTagPayload, SessionRecord, SetRecord},
};

/// Receives the raw bytes of every tag read while listening.
pub type TagCallback = Box<dyn Fn(Vec<u8>) + Send + Sync>;

/// A source of tag reads.
#[async_trait]
pub trait TagReader: Send + Sync {
    /// Reads one tag and returns its raw bytes.
    async fn read_once(&self) -> Result<Vec<u8>>;

    /// Reads tags until the reader stops, passing each read to `on_tag`.
    async fn listen(&self, on_tag: TagCallback) -> Result<()>;
}

/// Used when reads arrive from an external bridge instead of a local reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTagReader;

#[async_trait]
impl TagReader for DisabledTagReader {
    async fn read_once(&self) -> Result<Vec<u8>> {
        Err(AppError::TagUnavailable(
            "no local tag reader is configured".to_string(),
        ))
    }

    async fn listen(&self, _on_tag: TagCallback) -> Result<()> {
        Err(AppError::TagUnavailable(
            "no local tag reader is configured".to_string(),
        ))
    }
}

/// Slots on the simulated tag that can hold session data.
pub const DEFAULT_DATA_SLOTS: usize = 2;

/// A machine's tag as its firmware maintains it.
///
/// Each tap retires the current session into the prior slots with a freshly
/// generated record and opens a new current session. Only the newest
/// `data_slots` priors keep their data.
#[derive(Debug, Clone)]
pub struct SimulatedTag {
    machine_id: String,
    machine_name: Option<String>,
    machine_type: Option<String>,
    current_session_id: String,
    current_started_at: i64,
    prior_session_ids: Vec<String>,
    prior_session_data: HashMap<String, SessionRecord>,
    data_slots: usize,
}

fn new_session_id(rng: &mut impl Rng) -> String {
    format!("{:08x}", rng.r#gen::<u32>())
}

/// Three sets in the ranges a typical cable-stack session produces.
fn mock_record(rng: &mut impl Rng, started_at: i64, ended_at: i64) -> SessionRecord {
    let sets = (0..3)
        .map(|_| SetRecord {
            weight_lbs: f64::from(rng.gen_range(16..=24u32) * 5),
            reps: rng.gen_range(8..=12),
            duration_ms: rng.gen_range(28_000..=45_000),
        })
        .collect();

    SessionRecord {
        started_at_unix: started_at,
        ended_at_unix: ended_at.max(started_at),
        sets,
    }
}

impl SimulatedTag {
    /// Creates a tag with a fresh current session and no history.
    pub fn new(machine_id: &str, machine_name: Option<&str>) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            machine_name: machine_name.map(str::to_string),
            machine_type: Some("cable_stack".to_string()),
            current_session_id: new_session_id(&mut rand::thread_rng()),
            current_started_at: Utc::now().timestamp(),
            prior_session_ids: Vec::new(),
            prior_session_data: HashMap::new(),
            data_slots: DEFAULT_DATA_SLOTS,
        }
    }

    /// Sets how many prior slots keep their data, at most three.
    pub fn with_data_slots(mut self, data_slots: usize) -> Self {
        self.data_slots = data_slots.min(MAX_PRIOR_SLOTS);
        self
    }

    /// The tag's contents as a reader would see them now.
    pub fn payload(&self) -> RawTagPayload {
        RawTagPayload {
            version: Some(1),
            machine_id: self.machine_id.clone(),
            machine_name: self.machine_name.clone(),
            machine_type: self.machine_type.clone(),
            exercise_id: None,
            exercise_name: None,
            current_session_id: self.current_session_id.clone(),
            prior_session_ids: self.prior_session_ids.clone(),
            prior_session_data: self.prior_session_data.clone(),
            firmware_version: Some("1.0.0".to_string()),
        }
    }

    /// Advances the tag by one tap.
    pub fn tap(&mut self) {
        let now = Utc::now().timestamp();
        let mut rng = rand::thread_rng();

        let finished = std::mem::replace(&mut self.current_session_id, new_session_id(&mut rng));
        let record = mock_record(&mut rng, self.current_started_at, now);
        self.current_started_at = now;

        self.prior_session_data.insert(finished.clone(), record);
        self.prior_session_ids.insert(0, finished);
        self.prior_session_ids.truncate(MAX_PRIOR_SLOTS);

        let keep = &self.prior_session_ids[..self.data_slots.min(self.prior_session_ids.len())];
        self.prior_session_data.retain(|id, _| keep.contains(id));
    }
}

/// A tag reader backed by a [`SimulatedTag`] that is tapped on every read.
pub struct SimulatedTagReader {
    tag: Mutex<SimulatedTag>,
    interval: Duration,
}

impl SimulatedTagReader {
    /// Creates a new `SimulatedTagReader`.
    ///
    /// # Arguments
    ///
    /// * `tag` - The simulated tag.
    /// * `interval` - Time between taps while listening.
    pub fn new(tag: SimulatedTag, interval: Duration) -> Self {
        Self {
            tag: Mutex::new(tag),
            interval,
        }
    }

    fn tap_and_read(&self) -> Result<Vec<u8>> {
        let mut tag = self.tag.lock().unwrap_or_else(PoisonError::into_inner);
        tag.tap();
        sonic_rs::to_vec(&tag.payload())
            .map_err(|e| AppError::Internal(format!("Failed to encode simulated tag: {}", e)))
    }
}

#[async_trait]
impl TagReader for SimulatedTagReader {
    async fn read_once(&self) -> Result<Vec<u8>> {
        self.tap_and_read()
    }

    async fn listen(&self, on_tag: TagCallback) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let raw = self.tap_and_read()?;
            tracing::debug!("📡 Simulated tap ({} bytes)", raw.len());
            on_tag(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tag;
    use std::sync::Arc;

    #[test]
    fn tap_moves_current_into_priors_with_data() {
        let mut sim = SimulatedTag::new("machine-001", Some("Lat Pulldown"));
        let first = sim.payload().current_session_id;

        sim.tap();
        let payload = sim.payload();

        assert_ne!(payload.current_session_id, first);
        assert_eq!(payload.prior_session_ids, vec![first.clone()]);
        let record = payload.prior_record(&first).unwrap();
        assert_eq!(record.sets.len(), 3);
        for set in &record.sets {
            assert!((80.0..=120.0).contains(&set.weight_lbs));
            assert!((8..=12).contains(&set.reps));
            assert!((28_000..=45_000).contains(&set.duration_ms));
        }
    }

    #[test]
    fn keeps_three_ids_but_only_the_newest_data() {
        let mut sim = SimulatedTag::new("machine-001", None);
        let mut retired = Vec::new();
        for _ in 0..5 {
            retired.push(sim.payload().current_session_id);
            sim.tap();
        }

        let payload = sim.payload();
        let newest: Vec<String> = retired.iter().rev().take(3).cloned().collect();
        assert_eq!(payload.prior_session_ids, newest);
        assert_eq!(payload.prior_session_data.len(), DEFAULT_DATA_SLOTS);
        assert!(payload.prior_record(&newest[2]).is_none());
    }

    #[tokio::test]
    async fn reads_parse_as_tag_payloads() {
        let reader = SimulatedTagReader::new(
            SimulatedTag::new("machine-003", Some("Chest Press")),
            Duration::from_secs(45),
        );

        let raw = reader.read_once().await.unwrap();
        let parsed = tag::parse(&raw).unwrap();

        assert_eq!(parsed.machine_id, "machine-003");
        assert_eq!(parsed.machine_label(), "Chest Press");
        assert_eq!(parsed.prior_session_ids.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn listen_taps_on_each_interval() {
        let reader = Arc::new(SimulatedTagReader::new(
            SimulatedTag::new("machine-001", None),
            Duration::from_secs(45),
        ));
        let reads = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&reads);
        let listener = Arc::clone(&reader);
        let task = tokio::spawn(async move {
            listener
                .listen(Box::new(move |raw| sink.lock().unwrap().push(raw)))
                .await
        });

        tokio::time::sleep(Duration::from_secs(100)).await;
        task.abort();

        assert_eq!(reads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_reader_is_unavailable() {
        assert!(matches!(
            DisabledTagReader.read_once().await,
            Err(AppError::TagUnavailable(_))
        ));
    }
}
