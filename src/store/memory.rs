use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::{Mutex, MutexGuard};

use super::{Keyspace, Store, Transaction};
use crate::error::Result;

type Space = BTreeMap<Vec<u8>, Vec<u8>>;

/// A store kept entirely in process memory. Transactions are serialised by a
/// single lock, held for the lifetime of the transaction.
#[derive(Default)]
pub struct MemoryStore {
    spaces: Mutex<[Space; Keyspace::COUNT]>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            spaces: self.spaces.lock(),
            undo: Vec::new(),
        }))
    }

    fn wipe(&self) -> Result<()> {
        let mut spaces = self.spaces.lock();
        for space in Keyspace::ALL {
            if space != Keyspace::Sequences {
                spaces[space.index()].clear();
            }
        }
        Ok(())
    }
}

struct MemoryTransaction<'a> {
    spaces: MutexGuard<'a, [Space; Keyspace::COUNT]>,
    /// Prior values of every key written, newest last. Replayed backwards
    /// when the transaction is dropped uncommitted.
    undo: Vec<(Keyspace, Vec<u8>, Option<Vec<u8>>)>,
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&mut self, space: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.spaces[space.index()].get(key).cloned())
    }

    fn put(&mut self, space: Keyspace, key: &[u8], value: &[u8]) -> Result<()> {
        let prior =
            self.spaces[space.index()].insert(key.to_vec(), value.to_vec());
        self.undo.push((space, key.to_vec(), prior));
        Ok(())
    }

    fn delete(&mut self, space: Keyspace, key: &[u8]) -> Result<bool> {
        let prior = self.spaces[space.index()].remove(key);
        let existed = prior.is_some();
        if existed {
            self.undo.push((space, key.to_vec(), prior));
        }
        Ok(existed)
    }

    fn scan(
        &mut self,
        space: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(range(&self.spaces[space.index()], start, end)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn count(
        &mut self,
        space: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<u64> {
        Ok(range(&self.spaces[space.index()], start, end).count() as u64)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.undo.clear();
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        while let Some((space, key, prior)) = self.undo.pop() {
            let space = &mut self.spaces[space.index()];
            match prior {
                Some(value) => space.insert(key, value),
                None => space.remove(&key),
            };
        }
    }
}

fn range<'a>(
    space: &'a Space,
    start: &[u8],
    end: Option<&[u8]>,
) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a {
    let upper = match end {
        Some(end) if end > start => Bound::Excluded(end.to_vec()),
        // An empty range; BTreeMap::range panics on inverted bounds.
        Some(_) => Bound::Excluded(start.to_vec()),
        None => Bound::Unbounded,
    };
    space.range((Bound::Included(start.to_vec()), upper))
}
