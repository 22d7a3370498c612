//! Record layouts and secondary indexes on top of the storage adapter.
//!
//! Keys are built so that byte order equals the order the engines need:
//! integers are big-endian and strings are length-prefixed, so one tube or
//! channel can never be a key prefix of another.

pub(crate) mod jobs;
pub(crate) mod messages;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::store::{Keyspace, Transaction};

/// Appends a length-prefixed string to `key`.
pub(crate) fn put_name(key: &mut BytesMut, name: &str) {
    key.put_u32(name.len() as u32);
    key.put_slice(name.as_bytes());
}

pub(crate) fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Reads the big-endian id every index key ends with.
pub(crate) fn trailing_id(key: &[u8]) -> Result<u64> {
    match key.len().checked_sub(8) {
        Some(at) => Ok((&key[at..]).get_u64()),
        None => Err(Error::storage(format!(
            "malformed index key of {} bytes",
            key.len()
        ))),
    }
}

/// Returns the smallest key greater than every key starting with `prefix`, or
/// `None` if there isn't one.
pub(crate) fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Scans every key beginning with `prefix`, up to `limit` entries.
pub(crate) fn scan_prefix(
    txn: &mut dyn Transaction,
    space: Keyspace,
    prefix: &[u8],
    limit: usize,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    txn.scan(space, prefix, prefix_end(prefix).as_deref(), limit)
}

pub(crate) fn count_prefix(
    txn: &mut dyn Transaction,
    space: Keyspace,
    prefix: &[u8],
) -> Result<u64> {
    txn.count(space, prefix, prefix_end(prefix).as_deref())
}

/// Monotonic id sequences. Ids start at 1; a stored value is the last id
/// handed out.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Sequence {
    Jobs,
    Messages,
}

impl Sequence {
    fn key(self) -> &'static [u8] {
        match self {
            Sequence::Jobs => b"jobs",
            Sequence::Messages => b"messages",
        }
    }

    /// The last id handed out, or 0 if none has been.
    pub(crate) fn current(self, txn: &mut dyn Transaction) -> Result<u64> {
        match txn.get(Keyspace::Sequences, self.key())? {
            Some(value) if value.len() == 8 => Ok((&value[..]).get_u64()),
            Some(value) => Err(Error::storage(format!(
                "malformed sequence value of {} bytes",
                value.len()
            ))),
            None => Ok(0),
        }
    }

    pub(crate) fn next(self, txn: &mut dyn Transaction) -> Result<u64> {
        let id = self.current(txn)? + 1;
        txn.put(Keyspace::Sequences, self.key(), &id.to_be_bytes())?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::{MemoryStore, Store};

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_end(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
        assert_eq!(prefix_end(b""), None);
    }

    #[test]
    fn test_names_do_not_alias() {
        // Without the length prefix "ab" would be a key prefix of "abc".
        let mut short = BytesMut::new();
        put_name(&mut short, "ab");
        let mut long = BytesMut::new();
        put_name(&mut long, "abc");
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn test_trailing_id() {
        let mut key = BytesMut::new();
        put_name(&mut key, "tube");
        key.put_u64(0x0102_0304_0506_0708);
        assert_eq!(trailing_id(&key).unwrap(), 0x0102_0304_0506_0708);
        assert!(trailing_id(b"short").is_err());
    }

    #[test]
    fn test_sequences_are_independent() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();

        assert_eq!(Sequence::Jobs.current(txn.as_mut()).unwrap(), 0);
        assert_eq!(Sequence::Jobs.next(txn.as_mut()).unwrap(), 1);
        assert_eq!(Sequence::Jobs.next(txn.as_mut()).unwrap(), 2);
        assert_eq!(Sequence::Messages.next(txn.as_mut()).unwrap(), 1);
        assert_eq!(Sequence::Jobs.current(txn.as_mut()).unwrap(), 2);
    }
}
