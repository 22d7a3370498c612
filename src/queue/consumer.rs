use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::{pin, select};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::Queue;
use crate::error::Error;
use crate::types::job::Job;

/// Called with errors hit by a polling loop. The loop carries on polling.
pub type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Clone)]
pub struct ConsumerOptions {
    pub tube: String,
    /// Falls back to the configured poll interval.
    pub poll_interval: Option<Duration>,
    pub on_error: Option<ErrorHook>,
}

impl ConsumerOptions {
    pub fn new(tube: impl Into<String>) -> Self {
        Self {
            tube: tube.into(),
            poll_interval: None,
            on_error: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn on_error(
        mut self,
        hook: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ConsumerOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConsumerOptions")
            .field("tube", &self.tube)
            .field("poll_interval", &self.poll_interval)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Repeatedly reserves jobs from one tube and hands them to a handler, one at
/// a time, until stopped. Dropping a consumer stops it.
pub struct Consumer {
    stopped: AtomicBool,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Consumer {
    pub(super) fn spawn<F, Fut>(
        queue: Queue,
        handler: F,
        options: ConsumerOptions,
    ) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(queue, handler, options, cancel.clone()));

        Self {
            stopped: AtomicBool::new(false),
            cancel,
            task: Some(task),
        }
    }

    /// Stops polling once any in-flight dispatch completes. Returns `true` the
    /// first time it's called and `false` on every call after.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Stops the consumer and waits for its loop to exit.
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                warn!(%error, "consumer task failed");
            }
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[instrument(name = "consumer", skip_all, fields(tube = %options.tube))]
async fn run<F, Fut>(
    queue: Queue,
    handler: F,
    options: ConsumerOptions,
    cancel: CancellationToken,
) where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let interval = options
        .poll_interval
        .unwrap_or_else(|| queue.shared().config.poll_interval());

    info!("consumer started");

    while !cancel.is_cancelled() {
        // Register for wake-ups before looking, so a put landing between an
        // empty reserve and the wait below isn't missed.
        let notified = queue.shared().jobs_ready.notified();
        pin!(notified);
        notified.as_mut().enable();

        match queue.reserve(&options.tube) {
            Ok(Some(job)) => {
                debug!(id = job.id, "dispatching job");
                handler(job).await;
                continue;
            },
            Ok(None) => {},
            Err(error) => {
                warn!(%error, "reserve failed");
                if let Some(hook) = &options.on_error {
                    hook(&error);
                }
            },
        }

        select! {
            _ = cancel.cancelled() => break,
            _ = &mut notified => {},
            _ = tokio::time::sleep(interval) => {},
        }
    }

    info!("consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::config::HustleConfig;
    use crate::hustle::Hustle;
    use crate::types::job::PutOptions;
    use crate::types::states::JobState;

    const WAIT: Duration = Duration::from_secs(5);

    fn open() -> Hustle {
        let hustle = Hustle::new(HustleConfig::default());
        hustle.open().unwrap();
        hustle
    }

    #[tokio::test]
    async fn test_consume_tube() {
        let hustle = open();
        let queue = hustle.queue();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let consumer = {
            let queue = queue.clone();
            queue.clone().consumer(
                move |job| {
                    let queue = queue.clone();
                    let tx = tx.clone();
                    async move {
                        queue.delete(job.id).unwrap();
                        tx.send(job.id).unwrap();
                    }
                },
                ConsumerOptions::new("incoming"),
            )
        };

        let mut put_ids = Vec::new();
        for priority in 0..3 {
            let job = queue
                .put(
                    json!({ "test": "YOLOOOO" }),
                    PutOptions::new("incoming").priority(priority),
                )
                .unwrap();
            put_ids.push(job.id);
        }
        // Not our tube.
        queue.put(json!(null), PutOptions::new("outgoing")).unwrap();

        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(timeout(WAIT, rx.recv()).await.unwrap().unwrap());
        }
        got.sort();
        assert_eq!(got, put_ids);

        assert!(consumer.is_running());
        assert!(consumer.stop());
        assert!(!consumer.stop()); // yes, there should be two
        assert!(!consumer.stop());
        assert!(!consumer.is_running());

        consumer.join().await;
        assert_eq!(queue.count_ready("incoming").unwrap(), 0);
        assert_eq!(queue.count_ready("outgoing").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dispatches_in_priority_order() {
        let hustle = open();
        let queue = hustle.queue();
        for priority in [30, 10, 20] {
            queue
                .put(json!(priority), PutOptions::new("t").priority(priority))
                .unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = queue.consumer(
            move |job| {
                let tx = tx.clone();
                async move {
                    tx.send(job.priority).unwrap();
                }
            },
            ConsumerOptions::new("t"),
        );

        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(timeout(WAIT, rx.recv()).await.unwrap().unwrap());
        }
        assert_eq!(got, vec![10, 20, 30]);
        consumer.join().await;
    }

    #[tokio::test]
    async fn test_stop_lets_the_dispatch_in_flight_finish() {
        let hustle = open();
        let queue = hustle.queue();
        let first = queue.put(json!(1), PutOptions::new("t")).unwrap();
        let second = queue.put(json!(2), PutOptions::new("t")).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = queue.consumer(
            move |job| {
                let tx = tx.clone();
                async move {
                    tx.send(("begin", job.id)).unwrap();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    tx.send(("end", job.id)).unwrap();
                }
            },
            ConsumerOptions::new("t").poll_interval(Duration::from_millis(5)),
        );

        let begun = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(begun, ("begin", first.id));
        assert!(consumer.stop());
        consumer.join().await;

        assert_eq!(rx.recv().await, Some(("end", first.id)));
        // The sender went with the task, and nothing else was dispatched.
        assert_eq!(rx.recv().await, None);

        let untouched = queue.peek(second.id).unwrap().unwrap();
        assert_eq!(untouched.state, JobState::Ready);
        assert_eq!(queue.count_ready("t").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stopped_consumer_takes_nothing() {
        let hustle = open();
        let queue = hustle.queue();
        let consumer = queue.consumer(
            |_job| async {},
            ConsumerOptions::new("t").poll_interval(Duration::from_millis(5)),
        );
        consumer.join().await;

        queue.put(json!(1), PutOptions::new("t")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.count_ready("t").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_errors_reach_the_hook_and_polling_continues() {
        let hustle = open();
        let queue = hustle.queue();
        let errors = Arc::new(Mutex::new(0usize));
        let (tx, mut rx) = mpsc::unbounded_channel();

        hustle.close();
        let consumer = {
            let errors = Arc::clone(&errors);
            queue.consumer(
                move |job| {
                    let tx = tx.clone();
                    async move {
                        tx.send(job.id).unwrap();
                    }
                },
                ConsumerOptions::new("t")
                    .poll_interval(Duration::from_millis(5))
                    .on_error(move |error| {
                        assert!(matches!(error, Error::NotOpen));
                        *errors.lock().unwrap() += 1;
                    }),
            )
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(*errors.lock().unwrap() > 0);

        hustle.open().unwrap();
        let job = queue.put(json!(1), PutOptions::new("t")).unwrap();
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(job.id));
        consumer.join().await;
    }
}
