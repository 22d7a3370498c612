//! The message log and subscriber cursors.
//!
//! * `Messages`: `id` -> JSON-encoded [`Message`]
//! * `MessagesByChannel`: `(channel, id)` -> empty
//! * `Cursors`: `(channel, subscriber name)` -> last delivered id

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};

use super::{id_key, prefix_end, put_name, trailing_id, Sequence};
use crate::error::{Error, Result};
use crate::store::{Keyspace, Transaction};
use crate::types::message::Message;

fn channel_prefix(channel: &str) -> BytesMut {
    let mut key = BytesMut::with_capacity(4 + channel.len() + 8);
    put_name(&mut key, channel);
    key
}

fn cursor_key(channel: &str, name: &str) -> BytesMut {
    let mut key = channel_prefix(channel);
    put_name(&mut key, name);
    key
}

/// Appends a message to the log under the next global id.
pub(crate) fn append(
    txn: &mut dyn Transaction,
    channel: &str,
    data: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<Message> {
    let message = Message {
        id: Sequence::Messages.next(txn)?,
        channel: channel.to_owned(),
        data,
        created_at: now,
    };

    let mut index = channel_prefix(channel);
    index.put_u64(message.id);

    txn.put(
        Keyspace::Messages,
        &id_key(message.id),
        &serde_json::to_vec(&message)?,
    )?;
    txn.put(Keyspace::MessagesByChannel, &index, &[])?;

    Ok(message)
}

pub(crate) fn get(
    txn: &mut dyn Transaction,
    id: u64,
) -> Result<Option<Message>> {
    match txn.get(Keyspace::Messages, &id_key(id))? {
        Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
        None => Ok(None),
    }
}

/// Up to `limit` messages on `channel` with an id greater than `after`, in
/// ascending id order.
pub(crate) fn after(
    txn: &mut dyn Transaction,
    channel: &str,
    after: u64,
    limit: usize,
) -> Result<Vec<Message>> {
    let prefix = channel_prefix(channel);
    let Some(start) = after.checked_add(1) else {
        return Ok(Vec::new());
    };
    let mut start_key = prefix.clone();
    start_key.put_u64(start);

    let entries = txn.scan(
        Keyspace::MessagesByChannel,
        &start_key,
        prefix_end(&prefix).as_deref(),
        limit,
    )?;

    let mut messages = Vec::with_capacity(entries.len());
    for (key, _) in entries {
        let id = trailing_id(&key)?;
        let message = get(txn, id)?.ok_or_else(|| {
            Error::storage(format!("index entry for missing message {id}"))
        })?;
        messages.push(message);
    }
    Ok(messages)
}

/// The persisted cursor of a named subscriber.
pub(crate) fn cursor(
    txn: &mut dyn Transaction,
    channel: &str,
    name: &str,
) -> Result<Option<u64>> {
    match txn.get(Keyspace::Cursors, &cursor_key(channel, name))? {
        Some(value) if value.len() == 8 => Ok(Some((&value[..]).get_u64())),
        Some(value) => Err(Error::storage(format!(
            "malformed cursor of {} bytes",
            value.len()
        ))),
        None => Ok(None),
    }
}

pub(crate) fn set_cursor(
    txn: &mut dyn Transaction,
    channel: &str,
    name: &str,
    id: u64,
) -> Result<()> {
    txn.put(Keyspace::Cursors, &cursor_key(channel, name), &id_key(id))
}
