use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a job is in its lifecycle, with any state-specific data.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum JobState {
    Ready,
    /// Becomes ready once `until` has passed. Evaluated lazily on reserve.
    Delayed { until: DateTime<Utc> },
    Reserved { at: DateTime<Utc> },
    Buried,
}

impl JobState {
    pub fn kind(&self) -> StateKind {
        use JobState::*;

        match self {
            Ready => StateKind::Ready,
            Delayed { until: _ } => StateKind::Delayed,
            Reserved { at: _ } => StateKind::Reserved,
            Buried => StateKind::Buried,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.kind(), f)
    }
}

/// A job state stripped of its data, as used for index lookups.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Ready,
    Reserved,
    Delayed,
    Buried,
}

impl StateKind {
    pub fn as_str(self) -> &'static str {
        use StateKind::*;

        match self {
            Ready => "ready",
            Reserved => "reserved",
            Delayed => "delayed",
            Buried => "buried",
        }
    }

    /// Stable on-disk tag used as an index key component. Never renumber.
    pub(crate) fn code(self) -> u8 {
        use StateKind::*;

        match self {
            Ready => 0,
            Reserved => 1,
            Delayed => 2,
            Buried => 3,
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
