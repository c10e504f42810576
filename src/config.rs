use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::timeout::DEFAULT_SESSION_TIMEOUT;

/// Where tag reads come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSource {
    /// An external reader bridge posts reads to `/api/tags`.
    Bridge,
    /// A simulated machine tag is tapped on a fixed interval.
    Simulated,
}

impl FromStr for TagSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bridge" => Ok(TagSource::Bridge),
            "simulated" => Ok(TagSource::Simulated),
            other => anyhow::bail!("TAG_SOURCE must be 'bridge' or 'simulated', got '{}'", other),
        }
    }
}

/// The application's configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The authenticated user the session belongs to.
    pub user_id: String,
    /// The URL of the PostgreSQL database. Workouts are kept in memory when unset.
    pub database_url: Option<String>,
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// How long a tap session may stay open.
    pub session_timeout: Duration,
    /// Where tag reads come from.
    pub tag_source: TagSource,
    /// Time between simulated taps.
    pub simulated_tap_interval: Duration,
    /// The machine the simulated tag belongs to.
    pub simulated_machine_id: String,
    pub simulated_machine_name: Option<String>,
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let user_id = env::var("USER_ID").context("USER_ID must be set")?;
        if user_id.trim().is_empty() {
            anyhow::bail!("USER_ID must not be empty");
        }

        let session_timeout_ms: u64 = parse_var(
            "SESSION_TIMEOUT_MS",
            &DEFAULT_SESSION_TIMEOUT.as_millis().to_string(),
        )?;
        if session_timeout_ms == 0 {
            anyhow::bail!("SESSION_TIMEOUT_MS must be greater than zero");
        }

        let tap_interval_secs: u64 = parse_var("SIMULATED_TAP_INTERVAL_SECS", "45")?;

        Ok(Self {
            user_id,
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            bind_addr: parse_var("BIND_ADDR", "127.0.0.1:3000")?,
            session_timeout: Duration::from_millis(session_timeout_ms),
            tag_source: env::var("TAG_SOURCE")
                .unwrap_or_else(|_| "bridge".to_string())
                .parse()?,
            simulated_tap_interval: Duration::from_secs(tap_interval_secs.max(1)),
            simulated_machine_id: env::var("SIMULATED_MACHINE_ID")
                .unwrap_or_else(|_| "machine-001".to_string()),
            simulated_machine_name: Some(
                env::var("SIMULATED_MACHINE_NAME").unwrap_or_else(|_| "Lat Pulldown".to_string()),
            ),
        })
    }

    /// A configuration with defaults for `user_id` and no database.
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            database_url: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            tag_source: TagSource::Bridge,
            simulated_tap_interval: Duration::from_secs(45),
            simulated_machine_id: "machine-001".to_string(),
            simulated_machine_name: Some("Lat Pulldown".to_string()),
        }
    }
}
