use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::states::JobState;

/// Priority given to jobs put without one. Lower values are served first.
pub const DEFAULT_PRIORITY: u32 = 1024;

/// Ready jobs with a priority below this are counted as urgent.
pub const URGENT_PRIORITY: u32 = 1024;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Job {
    pub id: u64,
    pub tube: String,
    pub data: serde_json::Value,
    pub priority: u32,
    pub state: JobState, // also contains state-specific data
    pub created_at: DateTime<Utc>,
    pub reserves: u64,
    pub releases: u64,
    pub buries: u64,
    pub kicks: u64,
}

/// Options for [`Queue::put`](crate::queue::Queue::put).
#[derive(Clone, Debug)]
pub struct PutOptions {
    pub tube: String,
    /// Falls back to the configured default priority.
    pub priority: Option<u32>,
    /// A non-zero delay puts the job in the delayed state.
    pub delay: Option<Duration>,
}

impl PutOptions {
    pub fn new(tube: impl Into<String>) -> Self {
        Self {
            tube: tube.into(),
            priority: None,
            delay: None,
        }
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Options for [`Queue::release`](crate::queue::Queue::release).
#[derive(Clone, Debug, Default)]
pub struct ReleaseOptions {
    /// Replaces the job's priority when set.
    pub priority: Option<u32>,
    pub delay: Option<Duration>,
}

impl ReleaseOptions {
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Returns the instant `delay` after `now`, saturating far in the future.
pub(crate) fn delay_until(
    now: DateTime<Utc>,
    delay: Duration,
) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
