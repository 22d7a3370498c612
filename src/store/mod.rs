//! The storage adapter: an ordered, transactional key-value store split into a
//! fixed set of keyspaces.
//!
//! Everything above this module sees storage only through [`Store`] and
//! [`Transaction`]. Record layouts and indexes live in [`crate::records`].

mod disk;
mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use crate::error::Result;

/// Named key ranges. Each is an independent ordered map of bytes to bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Keyspace {
    /// Job records keyed by id.
    Jobs,
    /// `(tube, state, priority, id)` index over live jobs.
    JobsByTube,
    /// `(state, id)` index over live jobs.
    JobsByState,
    /// Message records keyed by id.
    Messages,
    /// `(channel, id)` index over messages.
    MessagesByChannel,
    /// Persisted subscriber cursors keyed by `(channel, name)`.
    Cursors,
    /// Id sequences.
    Sequences,
}

impl Keyspace {
    pub(crate) const COUNT: usize = 7;

    pub const ALL: [Keyspace; Keyspace::COUNT] = [
        Keyspace::Jobs,
        Keyspace::JobsByTube,
        Keyspace::JobsByState,
        Keyspace::Messages,
        Keyspace::MessagesByChannel,
        Keyspace::Cursors,
        Keyspace::Sequences,
    ];

    pub fn name(self) -> &'static str {
        use Keyspace::*;

        match self {
            Jobs => "jobs",
            JobsByTube => "jobs_by_tube",
            JobsByState => "jobs_by_state",
            Messages => "messages",
            MessagesByChannel => "messages_by_channel",
            Cursors => "cursors",
            Sequences => "sequences",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A storage backend. Implementations must make each [`Transaction`] atomic
/// and serialise conflicting transactions.
pub trait Store: Send + Sync {
    /// Begins a transaction. It commits only through [`Transaction::commit`];
    /// dropping it discards every write made through it.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>>;

    /// Begins a transaction that is only read from and never committed.
    /// Backends with a cheaper read path override this; writes through it
    /// either fail or are discarded with the transaction.
    fn begin_read(&self) -> Result<Box<dyn Transaction + '_>> {
        self.begin()
    }

    /// Removes every job, message and cursor. Id sequences are kept, so ids
    /// handed out after a wipe are still higher than every earlier one.
    fn wipe(&self) -> Result<()>;
}

/// Reads and writes against one keyspace at a time, all applied together on
/// commit.
pub trait Transaction {
    fn get(&mut self, space: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&mut self, space: Keyspace, key: &[u8], value: &[u8]) -> Result<()>;

    /// Returns whether a value was present.
    fn delete(&mut self, space: Keyspace, key: &[u8]) -> Result<bool>;

    /// Returns up to `limit` entries with `start <= key < end` in ascending
    /// key order. A missing `end` scans to the end of the keyspace.
    fn scan(
        &mut self,
        space: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Counts the keys with `start <= key < end`.
    fn count(
        &mut self,
        space: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<u64> {
        Ok(self.scan(space, start, end, usize::MAX)?.len() as u64)
    }

    fn commit(self: Box<Self>) -> Result<()>;
}
