use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::{pin, select};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::Pubsub;
use crate::error::{Error, Result};
use crate::queue::ErrorHook;
use crate::records::{messages, Sequence};
use crate::types::message::Message;

#[derive(Clone, Default)]
pub struct SubscriberOptions {
    /// Falls back to the configured poll interval.
    pub poll_interval: Option<Duration>,
    /// Persists the cursor under this name, so a later subscriber with the
    /// same name and channel carries on where this one stopped.
    pub name: Option<String>,
    /// Create the subscriber stopped; nothing is delivered until `start`.
    pub start_stopped: bool,
    pub on_error: Option<ErrorHook>,
}

impl SubscriberOptions {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn start_stopped(mut self) -> Self {
        self.start_stopped = true;
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

impl fmt::Debug for SubscriberOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SubscriberOptions")
            .field("poll_interval", &self.poll_interval)
            .field("name", &self.name)
            .field("start_stopped", &self.start_stopped)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Delivers the messages of one channel to a handler, one at a time and in
/// publish order. Dropping a subscriber ends its task.
pub struct Subscriber {
    channel: String,
    running: watch::Sender<bool>,
    /// Id of the last message delivered, or skipped at subscription. 0 when
    /// neither.
    cursor: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscriber {
    pub(super) fn spawn<F, Fut>(
        pubsub: Pubsub,
        channel: &str,
        handler: F,
        options: SubscriberOptions,
    ) -> Result<Self>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // Fix the starting point now, not when the task first runs, so
        // messages published right after this call are never skipped.
        let start = pubsub.shared().transact(|txn| {
            let Some(name) = &options.name else {
                return Sequence::Messages.current(txn);
            };
            match messages::cursor(txn, channel, name)? {
                Some(id) => Ok(id),
                None => {
                    let id = Sequence::Messages.current(txn)?;
                    messages::set_cursor(txn, channel, name, id)?;
                    Ok(id)
                },
            }
        })?;

        let cursor = Arc::new(AtomicU64::new(start));
        let (running, watching) = watch::channel(!options.start_stopped);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            Dispatch {
                pubsub,
                channel: channel.to_owned(),
                handler,
                options,
                cursor: Arc::clone(&cursor),
            },
            watching,
            cancel.clone(),
        ));

        Ok(Self {
            channel: channel.to_owned(),
            running,
            cursor,
            cancel,
            task: Some(task),
        })
    }

    /// Resumes delivery from the cursor. Returns `false` if already running.
    pub fn start(&self) -> bool {
        let was_running = self.running.send_replace(true);
        if !was_running {
            debug!(channel = %self.channel, "subscriber started");
        }
        !was_running
    }

    /// Pauses delivery once any in-flight dispatch completes. Returns `false`
    /// if already stopped.
    pub fn stop(&self) -> bool {
        let was_running = self.running.send_replace(false);
        if was_running {
            debug!(channel = %self.channel, "subscriber stopped");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Id of the last message handed to the handler, or of the newest message
    /// at subscription time if none has been yet.
    pub fn last_delivered_id(&self) -> Option<u64> {
        match self.cursor.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// Ends the subscriber's task and waits for it to exit.
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                warn!(%error, "subscriber task failed");
            }
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Dispatch<F> {
    pubsub: Pubsub,
    channel: String,
    handler: F,
    options: SubscriberOptions,
    cursor: Arc<AtomicU64>,
}

impl<F, Fut> Dispatch<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    /// Delivers the next message after the cursor, if there is one, and
    /// advances the cursor past it.
    async fn next(&self) -> Result<bool> {
        let after = self.cursor.load(Ordering::SeqCst);
        let Some(message) =
            self.pubsub.fetch_after(&self.channel, Some(after))?
        else {
            return Ok(false);
        };

        let id = message.id;
        debug!(id, "dispatching message");
        (self.handler)(message).await;

        // Advance even if persisting fails below: this instance must never
        // see the message twice.
        self.cursor.store(id, Ordering::SeqCst);
        if let Some(name) = &self.options.name {
            self.pubsub.shared().transact(|txn| {
                messages::set_cursor(txn, &self.channel, name, id)
            })?;
        }

        Ok(true)
    }

    fn report(&self, error: &Error) {
        warn!(%error, "subscriber poll failed");
        if let Some(hook) = &self.options.on_error {
            hook(error);
        }
    }
}

#[instrument(
    name = "subscriber",
    skip_all,
    fields(channel = %dispatch.channel)
)]
async fn run<F, Fut>(
    dispatch: Dispatch<F>,
    mut running: watch::Receiver<bool>,
    cancel: CancellationToken,
) where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let interval = dispatch
        .options
        .poll_interval
        .unwrap_or_else(|| dispatch.pubsub.shared().config.poll_interval());

    info!("subscriber task started");

    while !cancel.is_cancelled() {
        let is_running = *running.borrow_and_update();
        if !is_running {
            select! {
                _ = cancel.cancelled() => break,
                changed = running.changed() => if changed.is_err() {
                    break;
                },
            }
            continue;
        }

        let notified = dispatch.pubsub.shared().published.notified();
        pin!(notified);
        notified.as_mut().enable();

        match dispatch.next().await {
            Ok(true) => continue,
            Ok(false) => {},
            Err(error) => dispatch.report(&error),
        }

        select! {
            _ = cancel.cancelled() => break,
            _ = &mut notified => {},
            _ = tokio::time::sleep(interval) => {},
            changed = running.changed() => if changed.is_err() {
                break;
            },
        }
    }

    info!("subscriber task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::config::HustleConfig;
    use crate::hustle::Hustle;

    const WAIT: Duration = Duration::from_secs(5);

    fn open() -> Hustle {
        let hustle = Hustle::new(HustleConfig::default());
        hustle.open().unwrap();
        hustle
    }

    /// Subscribes a handler that forwards every message to the returned
    /// receiver.
    fn forwarding(
        pubsub: &Pubsub,
        channel: &str,
        options: SubscriberOptions,
    ) -> (Subscriber, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = pubsub
            .subscribe(
                channel,
                move |message| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(message);
                    }
                },
                options,
            )
            .unwrap();
        (sub, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_fan_out_delivers_each_message_once_per_subscriber() {
        let hustle = open();
        let pubsub = hustle.pubsub();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut subs = Vec::new();
        for _ in 0..2 {
            let tx = tx.clone();
            subs.push(
                pubsub
                    .subscribe(
                        "herp",
                        move |message: Message| {
                            let tx = tx.clone();
                            async move {
                                tx.send(message.id).unwrap();
                            }
                        },
                        SubscriberOptions::default(),
                    )
                    .unwrap(),
            );
        }

        let mut sent = Vec::new();
        for (channel, text) in [
            ("void", "and when they opened up her purse"),
            ("herp", "stop that bending"),
            ("herp", "your dog will love it"),
            ("herp", "impress the ladies"),
        ] {
            sent.push(pubsub.publish(channel, json!(text)).unwrap().id);
        }
        assert_eq!(sent.len(), 4);

        let mut seen: HashMap<u64, usize> = HashMap::new();
        for _ in 0..6 {
            let id = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            *seen.entry(id).or_default() += 1;
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.values().all(|&count| count == 2));
        assert!(!seen.contains_key(&sent[0]));

        // Nothing beyond the six dispatches.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        for sub in subs {
            assert!(sub.stop());
            sub.join().await;
        }
    }

    #[tokio::test]
    async fn test_messages_before_subscribing_are_not_delivered() {
        let hustle = open();
        let pubsub = hustle.pubsub();
        let old = pubsub.publish("c", json!("old")).unwrap();

        let (sub, mut rx) = forwarding(
            &pubsub,
            "c",
            SubscriberOptions::default(),
        );
        assert_eq!(sub.last_delivered_id(), Some(old.id));

        let new = pubsub.publish("c", json!("new")).unwrap();
        assert_eq!(recv(&mut rx).await.id, new.id);
        assert_eq!(sub.last_delivered_id(), Some(new.id));
        sub.join().await;
    }

    #[tokio::test]
    async fn test_stop_start_preserves_order() {
        let hustle = open();
        let pubsub = hustle.pubsub();

        let (sub, mut rx) = forwarding(
            &pubsub,
            "order",
            SubscriberOptions::default(),
        );
        sub.stop();
        assert!(!sub.is_running());

        for val in 0..10 {
            pubsub.publish("order", json!({ "val": val })).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        assert!(sub.start());
        assert!(!sub.start());

        let mut got = Vec::new();
        for _ in 0..10 {
            got.push(recv(&mut rx).await.data["val"].as_u64().unwrap());
        }
        assert_eq!(got, (0..10).collect::<Vec<u64>>());
        sub.join().await;
    }

    #[tokio::test]
    async fn test_stop_reports_transitions() {
        let hustle = open();
        let pubsub = hustle.pubsub();
        let (sub, mut rx) = forwarding(
            &pubsub,
            "gabbagabbahey",
            SubscriberOptions::default().start_stopped(),
        );
        assert!(!sub.stop());

        assert!(sub.start());
        let send = "you're loitering too, man";
        pubsub.publish("gabbagabbahey", json!(send)).unwrap();
        assert_eq!(recv(&mut rx).await.data, json!(send));

        assert!(sub.stop());
        assert!(!sub.stop());
        sub.join().await;
    }

    #[tokio::test]
    async fn test_stop_lets_the_dispatch_in_flight_finish() {
        let hustle = open();
        let pubsub = hustle.pubsub();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sub = pubsub
            .subscribe(
                "c",
                move |message: Message| {
                    let tx = tx.clone();
                    async move {
                        tx.send(("begin", message.id)).unwrap();
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        tx.send(("end", message.id)).unwrap();
                    }
                },
                SubscriberOptions::default()
                    .poll_interval(Duration::from_millis(5)),
            )
            .unwrap();

        let first = pubsub.publish("c", json!(1)).unwrap();
        let second = pubsub.publish("c", json!(2)).unwrap();

        let begun = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(begun, ("begin", first.id));
        assert!(sub.stop());

        let ended = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(ended, ("end", first.id));
        assert_eq!(sub.last_delivered_id(), Some(first.id));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        // Delivery picks up with the message after the one in flight.
        assert!(sub.start());
        let resumed = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(resumed, ("begin", second.id));
        sub.join().await;
    }

    #[tokio::test]
    async fn test_dispatch_is_sequential() {
        let hustle = open();
        let pubsub = hustle.pubsub();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // A slow handler must finish each message before the next begins.
        let sub = pubsub
            .subscribe(
                "slow",
                move |message: Message| {
                    let tx = tx.clone();
                    async move {
                        tx.send(("begin", message.id)).unwrap();
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        tx.send(("end", message.id)).unwrap();
                    }
                },
                SubscriberOptions::default(),
            )
            .unwrap();

        let ids: Vec<u64> = (0..3)
            .map(|n| pubsub.publish("slow", json!(n)).unwrap().id)
            .collect();

        let mut events = Vec::new();
        for _ in 0..6 {
            events.push(timeout(WAIT, rx.recv()).await.unwrap().unwrap());
        }
        let expected: Vec<_> = ids
            .iter()
            .flat_map(|&id| [("begin", id), ("end", id)])
            .collect();
        assert_eq!(events, expected);
        sub.join().await;
    }

    #[tokio::test]
    async fn test_named_subscriber_resumes_from_stored_cursor() {
        let hustle = open();
        let pubsub = hustle.pubsub();
        let options = SubscriberOptions::default().name("auditor");

        let (sub, mut rx) = forwarding(&pubsub, "log", options.clone());
        let first = pubsub.publish("log", json!(1)).unwrap();
        assert_eq!(recv(&mut rx).await.id, first.id);
        sub.join().await;

        // Published while nobody is listening.
        let second = pubsub.publish("log", json!(2)).unwrap();
        let third = pubsub.publish("log", json!(3)).unwrap();

        let (sub, mut rx) = forwarding(&pubsub, "log", options);
        assert_eq!(sub.last_delivered_id(), Some(first.id));
        assert_eq!(recv(&mut rx).await.id, second.id);
        assert_eq!(recv(&mut rx).await.id, third.id);
        sub.join().await;

        // An anonymous subscriber starts at the end instead.
        let (sub, _rx) = forwarding(
            &pubsub,
            "log",
            SubscriberOptions::default(),
        );
        assert_eq!(sub.last_delivered_id(), Some(third.id));
    }

    #[tokio::test]
    async fn test_errors_reach_the_hook() {
        let hustle = open();
        let pubsub = hustle.pubsub();
        let (errors, mut error_rx) = mpsc::unbounded_channel();

        let (sub, _rx) = forwarding(
            &pubsub,
            "c",
            SubscriberOptions::default()
                .poll_interval(Duration::from_millis(5))
                .on_error(move |error| {
                    let _ = errors.send(matches!(error, Error::NotOpen));
                }),
        );
        hustle.close();

        assert!(timeout(WAIT, error_rx.recv()).await.unwrap().unwrap());
        sub.join().await;
    }
}
