use std::path::{Path, PathBuf};

use redb::{
    Database, ReadTransaction, ReadableTable, TableDefinition,
    WriteTransaction,
};
use tracing::debug;

use super::{Keyspace, Store, Transaction};
use crate::error::{Error, Result};

type Table = TableDefinition<'static, &'static [u8], &'static [u8]>;

fn definition(space: Keyspace) -> Table {
    TableDefinition::new(space.name())
}

/// A durable store backed by a single redb database file. Every transaction is
/// a redb write transaction, so transactions are fully serialised. Reads use
/// redb read transactions, which run alongside writers and commit nothing.
pub struct DiskStore {
    db: Database,
    path: PathBuf,
}

impl DiskStore {
    /// Opens the database at `path`, creating it and its parent directory if
    /// needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(Error::storage)?;
            }
        }

        let db = Database::create(&path).map_err(Error::storage)?;

        // Create every table up front so read paths never race table creation.
        let txn = db.begin_write().map_err(Error::storage)?;
        for space in Keyspace::ALL {
            txn.open_table(definition(space)).map_err(Error::storage)?;
        }
        txn.commit().map_err(Error::storage)?;

        debug!(path = %path.display(), "opened disk store");

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for DiskStore {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        let txn = self.db.begin_write().map_err(Error::storage)?;
        Ok(Box::new(DiskTransaction { txn }))
    }

    fn begin_read(&self) -> Result<Box<dyn Transaction + '_>> {
        let txn = self.db.begin_read().map_err(Error::storage)?;
        Ok(Box::new(DiskReadTransaction { txn }))
    }

    fn wipe(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(Error::storage)?;
        for space in Keyspace::ALL {
            if space == Keyspace::Sequences {
                continue;
            }
            txn.delete_table(definition(space)).map_err(Error::storage)?;
            txn.open_table(definition(space)).map_err(Error::storage)?;
        }
        txn.commit().map_err(Error::storage)
    }
}

struct DiskTransaction {
    txn: WriteTransaction,
}

impl Transaction for DiskTransaction {
    fn get(&mut self, space: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table =
            self.txn.open_table(definition(space)).map_err(Error::storage)?;
        get_in(&table, key)
    }

    fn put(&mut self, space: Keyspace, key: &[u8], value: &[u8]) -> Result<()> {
        let mut table =
            self.txn.open_table(definition(space)).map_err(Error::storage)?;
        table.insert(key, value).map_err(Error::storage)?;
        Ok(())
    }

    fn delete(&mut self, space: Keyspace, key: &[u8]) -> Result<bool> {
        let mut table =
            self.txn.open_table(definition(space)).map_err(Error::storage)?;
        let existed = table.remove(key).map_err(Error::storage)?.is_some();
        Ok(existed)
    }

    fn scan(
        &mut self,
        space: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let table =
            self.txn.open_table(definition(space)).map_err(Error::storage)?;
        scan_in(&table, start, end, limit)
    }

    fn count(
        &mut self,
        space: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<u64> {
        let table =
            self.txn.open_table(definition(space)).map_err(Error::storage)?;
        count_in(&table, start, end)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().map_err(Error::storage)
    }
}

/// A redb read transaction. Writes are refused.
struct DiskReadTransaction {
    txn: ReadTransaction,
}

impl DiskReadTransaction {
    fn read_only(space: Keyspace) -> Error {
        Error::storage(format!(
            "write to {} in a read-only transaction",
            space.name()
        ))
    }
}

impl Transaction for DiskReadTransaction {
    fn get(&mut self, space: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table =
            self.txn.open_table(definition(space)).map_err(Error::storage)?;
        get_in(&table, key)
    }

    fn put(&mut self, space: Keyspace, _: &[u8], _: &[u8]) -> Result<()> {
        Err(Self::read_only(space))
    }

    fn delete(&mut self, space: Keyspace, _: &[u8]) -> Result<bool> {
        Err(Self::read_only(space))
    }

    fn scan(
        &mut self,
        space: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let table =
            self.txn.open_table(definition(space)).map_err(Error::storage)?;
        scan_in(&table, start, end, limit)
    }

    fn count(
        &mut self,
        space: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<u64> {
        let table =
            self.txn.open_table(definition(space)).map_err(Error::storage)?;
        count_in(&table, start, end)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn get_in(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    key: &[u8],
) -> Result<Option<Vec<u8>>> {
    let value = table.get(key).map_err(Error::storage)?;
    Ok(value.map(|v| v.value().to_vec()))
}

fn scan_in(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    start: &[u8],
    end: Option<&[u8]>,
    limit: usize,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let range = match end {
        Some(end) if end <= start => return Ok(Vec::new()),
        Some(end) => table.range::<&[u8]>(start..end),
        None => table.range::<&[u8]>(start..),
    }
    .map_err(Error::storage)?;

    let mut entries = Vec::new();
    for entry in range.take(limit) {
        let (key, value) = entry.map_err(Error::storage)?;
        entries.push((key.value().to_vec(), value.value().to_vec()));
    }
    Ok(entries)
}

fn count_in(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    start: &[u8],
    end: Option<&[u8]>,
) -> Result<u64> {
    let range = match end {
        Some(end) if end <= start => return Ok(0),
        Some(end) => table.range::<&[u8]>(start..end),
        None => table.range::<&[u8]>(start..),
    }
    .map_err(Error::storage)?;

    let mut count = 0;
    for entry in range {
        entry.map_err(Error::storage)?;
        count += 1;
    }
    Ok(count)
}
