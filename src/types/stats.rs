use serde::Serialize;

/// Per-tube job counts, as reported by
/// [`Queue::stats_tube`](crate::queue::Queue::stats_tube).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TubeStats {
    /// tube name
    pub name: String,
    /// number of jobs in ready state with priority < 1024
    #[serde(rename = "current-jobs-urgent")]
    pub current_jobs_urgent: u64,
    /// number of jobs in ready state
    #[serde(rename = "current-jobs-ready")]
    pub current_jobs_ready: u64,
    /// number of jobs reserved by consumers
    #[serde(rename = "current-jobs-reserved")]
    pub current_jobs_reserved: u64,
    /// number of jobs in delayed state
    #[serde(rename = "current-jobs-delayed")]
    pub current_jobs_delayed: u64,
    /// number of jobs in buried state
    #[serde(rename = "current-jobs-buried")]
    pub current_jobs_buried: u64,
}

impl TubeStats {
    /// Every live job in the tube.
    pub fn total(&self) -> u64 {
        self.current_jobs_ready
            + self.current_jobs_reserved
            + self.current_jobs_delayed
            + self.current_jobs_buried
    }
}
