//! Ordered publish/subscribe over an append-only message log.
//!
//! Publishing appends to the log. Every [`Subscriber`] reads the log through
//! its own cursor, so each subscriber sees every message on its channel, in
//! publish order, exactly once.

mod subscriber;

pub use subscriber::{Subscriber, SubscriberOptions};

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::hustle::Shared;
use crate::records::{messages, Sequence};
use crate::types::message::Message;

/// A handle on the pub/sub engine. Cheap to clone.
#[derive(Clone)]
pub struct Pubsub {
    shared: Arc<Shared>,
}

impl Pubsub {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Appends a message to `channel`. It's delivered to every subscriber of
    /// the channel whose cursor is behind it.
    #[instrument(level = "debug", skip(self, data), err)]
    pub fn publish(
        &self,
        channel: &str,
        data: serde_json::Value,
    ) -> Result<Message> {
        let now = Utc::now();
        let message = self
            .shared
            .transact(|txn| messages::append(txn, channel, data, now))?;

        debug!(id = message.id, "published");
        self.shared.published.notify_waiters();
        Ok(message)
    }

    /// The first message on `channel` published after the message with id
    /// `after` (or the first message at all, given `None`).
    pub fn fetch_after(
        &self,
        channel: &str,
        after: Option<u64>,
    ) -> Result<Option<Message>> {
        self.shared.read(|txn| {
            Ok(messages::after(txn, channel, after.unwrap_or(0), 1)?
                .into_iter()
                .next())
        })
    }

    /// The id of the most recently published message on any channel.
    pub fn last_id(&self) -> Result<Option<u64>> {
        let id = self.shared.read(|txn| Sequence::Messages.current(txn))?;
        Ok((id > 0).then_some(id))
    }

    /// Subscribes `handler` to `channel`. Only messages published after this
    /// call are delivered, unless `options` names a subscriber with a stored
    /// cursor, in which case delivery resumes after that cursor. Must be called
    /// within a tokio runtime.
    pub fn subscribe<F, Fut>(
        &self,
        channel: &str,
        handler: F,
        options: SubscriberOptions,
    ) -> Result<Subscriber>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Subscriber::spawn(self.clone(), channel, handler, options)
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}
