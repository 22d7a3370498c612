//! The storage lifecycle: opening, closing and wiping the store that the queue
//! and pub/sub engines run against.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::{HustleConfig, StorageConfig};
use crate::error::{Error, Result};
use crate::pubsub::Pubsub;
use crate::queue::Queue;
use crate::store::{DiskStore, MemoryStore, Store, Transaction};

/// A handle on one hustle database. Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct Hustle {
    shared: Arc<Shared>,
}

/// State shared by every handle, engine, consumer and subscriber.
pub(crate) struct Shared {
    pub(crate) config: HustleConfig,
    store: RwLock<Option<Arc<dyn Store>>>,
    /// Signalled whenever a job may have become ready.
    pub(crate) jobs_ready: Notify,
    /// Signalled whenever a message is published.
    pub(crate) published: Notify,
}

impl Shared {
    /// Runs `f` in one transaction, committing only if it succeeds.
    pub(crate) fn transact<T>(
        &self,
        f: impl FnOnce(&mut dyn Transaction) -> Result<T>,
    ) -> Result<T> {
        let store = self.store.read().clone().ok_or(Error::NotOpen)?;
        let mut txn = store.begin()?;
        let out = f(txn.as_mut())?;
        txn.commit()?;
        Ok(out)
    }

    /// Runs `f` in a read transaction, which is dropped rather than
    /// committed.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&mut dyn Transaction) -> Result<T>,
    ) -> Result<T> {
        let store = self.store.read().clone().ok_or(Error::NotOpen)?;
        let mut txn = store.begin_read()?;
        f(txn.as_mut())
    }
}

impl Hustle {
    /// Creates a handle. Nothing is opened until [`Hustle::open`].
    pub fn new(config: HustleConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                store: RwLock::new(None),
                jobs_ready: Notify::new(),
                published: Notify::new(),
            }),
        }
    }

    /// Opens the configured store. Opening an open handle does nothing.
    pub fn open(&self) -> Result<()> {
        let mut store = self.shared.store.write();
        if store.is_some() {
            return Ok(());
        }

        let opened: Arc<dyn Store> = match &self.shared.config.storage {
            StorageConfig::Memory => Arc::new(MemoryStore::new()),
            StorageConfig::Disk { path } => Arc::new(DiskStore::open(path)?),
        };
        *store = Some(opened);

        info!(storage = ?self.shared.config.storage, "opened");
        Ok(())
    }

    /// Closes the store, returning whether it was open. Consumers and
    /// subscribers keep running but see [`Error::NotOpen`] until reopened.
    pub fn close(&self) -> bool {
        let closed = self.shared.store.write().take().is_some();
        if closed {
            info!("closed");
        }
        closed
    }

    pub fn is_open(&self) -> bool {
        self.shared.store.read().is_some()
    }

    /// Removes every job, message and cursor. Ids keep counting up from where
    /// they were, so live subscribers carry on receiving new messages. A
    /// closed disk store has its database file deleted instead.
    pub fn wipe(&self) -> Result<()> {
        let store = self.shared.store.read().clone();
        match (store, &self.shared.config.storage) {
            (Some(store), _) => store.wipe()?,
            (None, StorageConfig::Disk { path }) => {
                match std::fs::remove_file(path) {
                    Ok(()) => {},
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                    Err(e) => return Err(Error::storage(e)),
                }
            },
            (None, StorageConfig::Memory) => {},
        }

        debug!("wiped");
        Ok(())
    }

    /// The job queue.
    pub fn queue(&self) -> Queue {
        Queue::new(Arc::clone(&self.shared))
    }

    /// The publish/subscribe engine.
    pub fn pubsub(&self) -> Pubsub {
        Pubsub::new(Arc::clone(&self.shared))
    }

    pub fn config(&self) -> &HustleConfig {
        &self.shared.config
    }
}
