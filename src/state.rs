use std::sync::Arc;

use crate::config::{Config, TagSource};
use crate::error::Result;
use crate::repositories::{memory::InMemoryWorkoutStore, workout::{PgWorkoutStore, WorkoutStore}};
use crate::services::{
    event_loop::{self, SessionHandle},
    notifier::BroadcastNotifier,
    reader::{DisabledTagReader, SimulatedTag, SimulatedTagReader, TagReader},
};

/// Notifications buffered for slow stream subscribers.
pub const NOTIFICATION_BUFFER: usize = 64;

/// The maximum number of pooled database connections.
pub const DB_POOL_SIZE: usize = 16;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// The workout store.
    pub store: Arc<dyn WorkoutStore>,
    /// The queue of the user's session task.
    pub sessions: SessionHandle,
    /// The local tag reader.
    pub reader: Arc<dyn TagReader>,
    /// The notification fan-out.
    pub notifier: BroadcastNotifier,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn WorkoutStore> = match &config.database_url {
            Some(url) => {
                let pool = crate::db::create_pool(url, DB_POOL_SIZE)?;
                crate::db::ensure_schema(&pool).await?;
                tracing::info!("✅ PostgreSQL pool initialized with deadpool-postgres");
                Arc::new(PgWorkoutStore::new(pool))
            }
            None => {
                tracing::warn!("⚠️ DATABASE_URL not set, workouts are kept in memory");
                Arc::new(InMemoryWorkoutStore::new())
            }
        };

        let state = Self::from_parts(config.clone(), store);
        tracing::info!("✅ Session task started for {}", config.user_id);
        Ok(state)
    }

    /// Builds the state around an existing store and starts the session task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_parts(config: Config, store: Arc<dyn WorkoutStore>) -> Self {
        let notifier = BroadcastNotifier::new(NOTIFICATION_BUFFER);

        let (sessions, _task) = event_loop::spawn(
            config.user_id.clone(),
            Arc::clone(&store),
            Arc::new(notifier.clone()),
            config.session_timeout,
        );

        let reader: Arc<dyn TagReader> = match config.tag_source {
            TagSource::Simulated => Arc::new(SimulatedTagReader::new(
                SimulatedTag::new(
                    &config.simulated_machine_id,
                    config.simulated_machine_name.as_deref(),
                ),
                config.simulated_tap_interval,
            )),
            TagSource::Bridge => Arc::new(DisabledTagReader),
        };

        Self {
            config,
            store,
            sessions,
            reader,
            notifier,
        }
    }
}
