//! The job queue: a beanstalkd-style state machine over the job records.
//!
//! ```text
//!  put ──> ready ──reserve──> reserved ──release──> ready | delayed
//!    │       ^                    │
//!    │       └──kick── buried <───┴──bury (from any live state)
//!    └──> delayed ──(due, on reserve)──> ready
//! ```
//!
//! Every operation is a single transaction against the open store.

mod consumer;

pub use consumer::{Consumer, ConsumerOptions, ErrorHook};

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use tracing::{debug, instrument, trace};

use crate::error::{Error, Result};
use crate::hustle::Shared;
use crate::records::{jobs, Sequence};
use crate::store::Transaction;
use crate::types::job::{
    delay_until, Job, PutOptions, ReleaseOptions, URGENT_PRIORITY,
};
use crate::types::states::{JobState, StateKind};
use crate::types::stats::TubeStats;

/// A handle on the job queue. Cheap to clone.
#[derive(Clone)]
pub struct Queue {
    shared: Arc<Shared>,
}

impl Queue {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Creates a job in `options.tube`, ready immediately unless a delay is
    /// given.
    #[instrument(
        level = "debug",
        skip(self, data),
        fields(tube = %options.tube),
        err
    )]
    pub fn put(
        &self,
        data: serde_json::Value,
        options: PutOptions,
    ) -> Result<Job> {
        let now = Utc::now();
        let state = match options.delay {
            Some(delay) if !delay.is_zero() => JobState::Delayed {
                until: delay_until(now, delay),
            },
            _ => JobState::Ready,
        };
        let priority = options
            .priority
            .unwrap_or(self.shared.config.default_priority);

        let job = self.shared.transact(|txn| {
            let job = Job {
                id: Sequence::Jobs.next(txn)?,
                tube: options.tube,
                data,
                priority,
                state,
                created_at: now,
                reserves: 0,
                releases: 0,
                buries: 0,
                kicks: 0,
            };
            jobs::put(txn, &job)?;
            Ok(job)
        })?;

        debug!(id = job.id, priority, state = %job.state, "put job");
        self.shared.jobs_ready.notify_waiters();
        Ok(job)
    }

    /// Looks a job up by id in any state.
    pub fn peek(&self, id: u64) -> Result<Option<Job>> {
        self.shared.read(|txn| jobs::get(txn, id))
    }

    /// Claims the ready job in `tube` with the lowest `(priority, id)`, or
    /// returns `None` if there isn't one. Delayed jobs whose time has come are
    /// made ready first.
    #[instrument(level = "debug", skip(self), err)]
    pub fn reserve(&self, tube: &str) -> Result<Option<Job>> {
        // Idle polling stays on the read path.
        if self.peek_ready(tube)?.is_none() {
            trace!("nothing to reserve");
            return Ok(None);
        }

        let now = Utc::now();

        let job = self.shared.transact(|txn| {
            promote_due(txn, tube, now)?;

            let Some(mut job) =
                jobs::first_in_tube(txn, tube, StateKind::Ready)?
            else {
                return Ok(None);
            };

            job.state = JobState::Reserved { at: now };
            job.reserves += 1;
            jobs::put(txn, &job)?;
            Ok(Some(job))
        })?;

        match &job {
            Some(job) => debug!(id = job.id, "reserved job"),
            None => trace!("nothing to reserve"),
        }
        Ok(job)
    }

    /// Returns a reserved job to the ready queue, or to the delayed state if
    /// `options.delay` is non-zero.
    #[instrument(level = "debug", skip(self), err)]
    pub fn release(&self, id: u64, options: ReleaseOptions) -> Result<Job> {
        let now = Utc::now();

        let job = self.shared.transact(|txn| {
            let mut job = jobs::fetch(txn, id)?;
            expect_state(&job, &[StateKind::Reserved], "reserved")?;

            if let Some(priority) = options.priority {
                job.priority = priority;
            }
            job.state = match options.delay {
                Some(delay) if !delay.is_zero() => JobState::Delayed {
                    until: delay_until(now, delay),
                },
                _ => JobState::Ready,
            };
            job.releases += 1;
            jobs::put(txn, &job)?;
            Ok(job)
        })?;

        debug!(priority = job.priority, state = %job.state, "released job");
        self.shared.jobs_ready.notify_waiters();
        Ok(job)
    }

    /// Sets a job aside until it's kicked.
    #[instrument(level = "debug", skip(self), err)]
    pub fn bury(&self, id: u64) -> Result<Job> {
        self.shared.transact(|txn| {
            let mut job = jobs::fetch(txn, id)?;
            job.state = JobState::Buried;
            job.buries += 1;
            jobs::put(txn, &job)?;
            Ok(job)
        })
    }

    /// Moves up to `bound` buried or delayed jobs, across every tube and
    /// oldest first, to the ready state. Returns how many were moved.
    #[instrument(level = "debug", skip(self), err)]
    pub fn kick(&self, bound: u64) -> Result<u64> {
        let bound = usize::try_from(bound).unwrap_or(usize::MAX);

        let kicked = self.shared.transact(|txn| {
            let buried = jobs::in_state(txn, StateKind::Buried, bound)?;
            let delayed = jobs::in_state(txn, StateKind::Delayed, bound)?;

            let mut kicked = 0;
            for mut job in buried
                .into_iter()
                .merge_by(delayed, |a, b| a.id < b.id)
                .take(bound)
            {
                job.state = JobState::Ready;
                job.kicks += 1;
                jobs::put(txn, &job)?;
                kicked += 1;
            }
            Ok(kicked)
        })?;

        debug!(kicked, "kicked jobs");
        if kicked > 0 {
            self.shared.jobs_ready.notify_waiters();
        }
        Ok(kicked)
    }

    /// Kicks one buried or delayed job.
    #[instrument(level = "debug", skip(self), err)]
    pub fn kick_job(&self, id: u64) -> Result<Job> {
        let job = self.shared.transact(|txn| {
            let mut job = jobs::fetch(txn, id)?;
            expect_state(
                &job,
                &[StateKind::Buried, StateKind::Delayed],
                "buried or delayed",
            )?;

            job.state = JobState::Ready;
            job.kicks += 1;
            jobs::put(txn, &job)?;
            Ok(job)
        })?;

        self.shared.jobs_ready.notify_waiters();
        Ok(job)
    }

    /// Removes a job for good. Deleting a job that doesn't exist isn't an
    /// error; `None` is returned instead of the deleted job.
    #[instrument(level = "debug", skip(self), err)]
    pub fn delete(&self, id: u64) -> Result<Option<Job>> {
        let job = self.shared.transact(|txn| jobs::remove(txn, id))?;
        if job.is_none() {
            trace!("no such job to delete");
        }
        Ok(job)
    }

    /// Number of ready jobs in `tube`.
    pub fn count_ready(&self, tube: &str) -> Result<u64> {
        self.shared
            .read(|txn| jobs::count_in_tube(txn, tube, StateKind::Ready))
    }

    /// The job the next [`Queue::reserve`] on `tube` would claim, left
    /// unreserved.
    pub fn peek_ready(&self, tube: &str) -> Result<Option<Job>> {
        let now = Utc::now();
        self.shared.read(|txn| {
            let ready = jobs::first_in_tube(txn, tube, StateKind::Ready)?;
            let due = jobs::in_tube(txn, tube, StateKind::Delayed, usize::MAX)?
                .into_iter()
                .filter(|job| is_due(job, now))
                .min_by_key(|job| (job.priority, job.id));

            Ok(match (ready, due) {
                (Some(ready), Some(due)) => Some(
                    if (due.priority, due.id) < (ready.priority, ready.id) {
                        due
                    } else {
                        ready
                    },
                ),
                (ready, due) => ready.or(due),
            })
        })
    }

    /// The delayed job in `tube` that becomes ready soonest.
    pub fn peek_delayed(&self, tube: &str) -> Result<Option<Job>> {
        self.shared.read(|txn| {
            Ok(jobs::in_tube(txn, tube, StateKind::Delayed, usize::MAX)?
                .into_iter()
                .min_by_key(|job| match job.state {
                    JobState::Delayed { until } => (until, job.id),
                    _ => (DateTime::<Utc>::MAX_UTC, job.id),
                }))
        })
    }

    /// The oldest buried job in `tube`.
    pub fn peek_buried(&self, tube: &str) -> Result<Option<Job>> {
        self.shared.read(|txn| {
            Ok(jobs::in_tube(txn, tube, StateKind::Buried, usize::MAX)?
                .into_iter()
                .min_by_key(|job| job.id))
        })
    }

    pub fn stats_tube(&self, tube: &str) -> Result<TubeStats> {
        self.shared.read(|txn| {
            let urgent = jobs::in_tube(txn, tube, StateKind::Ready, usize::MAX)?
                .iter()
                .take_while(|job| job.priority < URGENT_PRIORITY)
                .count() as u64;

            Ok(TubeStats {
                name: tube.to_owned(),
                current_jobs_urgent: urgent,
                current_jobs_ready: jobs::count_in_tube(
                    txn,
                    tube,
                    StateKind::Ready,
                )?,
                current_jobs_reserved: jobs::count_in_tube(
                    txn,
                    tube,
                    StateKind::Reserved,
                )?,
                current_jobs_delayed: jobs::count_in_tube(
                    txn,
                    tube,
                    StateKind::Delayed,
                )?,
                current_jobs_buried: jobs::count_in_tube(
                    txn,
                    tube,
                    StateKind::Buried,
                )?,
            })
        })
    }

    /// Starts a [`Consumer`] that reserves jobs from `options.tube` and hands
    /// each to `handler`. Must be called within a tokio runtime.
    pub fn consumer<F, Fut>(
        &self,
        handler: F,
        options: ConsumerOptions,
    ) -> Consumer
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Consumer::spawn(self.clone(), handler, options)
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

fn is_due(job: &Job, now: DateTime<Utc>) -> bool {
    matches!(job.state, JobState::Delayed { until } if until <= now)
}

/// Makes every delayed job in `tube` whose delay has elapsed ready.
fn promote_due(
    txn: &mut dyn Transaction,
    tube: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    for mut job in jobs::in_tube(txn, tube, StateKind::Delayed, usize::MAX)? {
        if is_due(&job, now) {
            trace!(id = job.id, "delay elapsed");
            job.state = JobState::Ready;
            jobs::put(txn, &job)?;
        }
    }
    Ok(())
}

fn expect_state(
    job: &Job,
    allowed: &[StateKind],
    expected: &'static str,
) -> Result<()> {
    let state = job.state.kind();
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(Error::InvalidState {
            id: job.id,
            state: state.as_str(),
            expected,
        })
    }
}
