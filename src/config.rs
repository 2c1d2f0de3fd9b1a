use std::env;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::Context;
use chrono::Duration;
use tracing::info;

/// Clustering and lifecycle thresholds. The defaults come from product
/// copy (5 signals / 24h form an event, 72h of silence resolves one) and
/// are deliberately overridable per deployment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sliding clustering window, in hours.
    pub window_hours: i64,
    /// Minimum chained signals required to form an event.
    pub formation_threshold: i64,
    /// Hours of signal silence before an open event may resolve.
    pub cooldown_hours: i64,
    /// Bounded retries for attribution conflicts before ServiceBusy.
    pub max_retries: u32,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self {
            window_hours: try_load("EPIWATCH_WINDOW_HOURS", 24)?,
            formation_threshold: try_load("EPIWATCH_FORMATION_THRESHOLD", 5)?,
            cooldown_hours: try_load("EPIWATCH_COOLDOWN_HOURS", 72)?,
            max_retries: try_load("EPIWATCH_MAX_RETRIES", 3)?,
        })
    }

    pub fn window(&self) -> Duration {
        Duration::hours(self.window_hours)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::hours(self.cooldown_hours)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_hours: 24,
            formation_threshold: 5,
            cooldown_hours: 72,
            max_retries: 3,
        }
    }
}

fn try_load<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw}")),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
