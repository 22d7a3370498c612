//! Job records and their indexes.
//!
//! * `Jobs`: `id` -> JSON-encoded [`Job`]
//! * `JobsByTube`: `(tube, state, priority, id)` -> empty
//! * `JobsByState`: `(state, id)` -> empty
//!
//! Every write goes through [`put`] or [`remove`], which keep exactly one
//! entry per live job in each index.

use bytes::{BufMut, BytesMut};

use super::{count_prefix, id_key, put_name, scan_prefix, trailing_id};
use crate::error::{Error, Result};
use crate::store::{Keyspace, Transaction};
use crate::types::job::Job;
use crate::types::states::StateKind;

fn tube_prefix(tube: &str, state: StateKind) -> BytesMut {
    let mut key = BytesMut::with_capacity(4 + tube.len() + 1 + 4 + 8);
    put_name(&mut key, tube);
    key.put_u8(state.code());
    key
}

fn tube_key(job: &Job) -> BytesMut {
    let mut key = tube_prefix(&job.tube, job.state.kind());
    key.put_u32(job.priority);
    key.put_u64(job.id);
    key
}

fn state_key(state: StateKind, id: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = state.code();
    key[1..].copy_from_slice(&id_key(id));
    key
}

pub(crate) fn get(txn: &mut dyn Transaction, id: u64) -> Result<Option<Job>> {
    match txn.get(Keyspace::Jobs, &id_key(id))? {
        Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
        None => Ok(None),
    }
}

/// As [`get`], but a missing job is a [`Error::NotFound`].
pub(crate) fn fetch(txn: &mut dyn Transaction, id: u64) -> Result<Job> {
    get(txn, id)?.ok_or(Error::NotFound { id })
}

/// Inserts or replaces a job, moving its index entries if its tube, state or
/// priority changed.
pub(crate) fn put(txn: &mut dyn Transaction, job: &Job) -> Result<()> {
    if let Some(prior) = get(txn, job.id)? {
        unindex(txn, &prior)?;
    }

    txn.put(Keyspace::Jobs, &id_key(job.id), &serde_json::to_vec(job)?)?;
    txn.put(Keyspace::JobsByTube, &tube_key(job), &[])?;
    txn.put(
        Keyspace::JobsByState,
        &state_key(job.state.kind(), job.id),
        &[],
    )?;

    Ok(())
}

/// Deletes a job and its index entries, returning it if it existed.
pub(crate) fn remove(
    txn: &mut dyn Transaction,
    id: u64,
) -> Result<Option<Job>> {
    let Some(job) = get(txn, id)? else {
        return Ok(None);
    };

    unindex(txn, &job)?;
    txn.delete(Keyspace::Jobs, &id_key(id))?;

    Ok(Some(job))
}

fn unindex(txn: &mut dyn Transaction, job: &Job) -> Result<()> {
    txn.delete(Keyspace::JobsByTube, &tube_key(job))?;
    txn.delete(Keyspace::JobsByState, &state_key(job.state.kind(), job.id))?;
    Ok(())
}

/// Loads the jobs named by a run of index keys.
fn load(
    txn: &mut dyn Transaction,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
) -> Result<Vec<Job>> {
    let mut jobs = Vec::with_capacity(entries.len());
    for (key, _) in entries {
        let id = trailing_id(&key)?;
        let job = get(txn, id)?.ok_or_else(|| {
            Error::storage(format!("index entry for missing job {id}"))
        })?;
        jobs.push(job);
    }
    Ok(jobs)
}

/// Jobs in `tube` and `state`, lowest `(priority, id)` first.
pub(crate) fn in_tube(
    txn: &mut dyn Transaction,
    tube: &str,
    state: StateKind,
    limit: usize,
) -> Result<Vec<Job>> {
    let prefix = tube_prefix(tube, state);
    let entries = scan_prefix(txn, Keyspace::JobsByTube, &prefix, limit)?;
    load(txn, entries)
}

/// The job in `tube` and `state` with the lowest `(priority, id)`.
pub(crate) fn first_in_tube(
    txn: &mut dyn Transaction,
    tube: &str,
    state: StateKind,
) -> Result<Option<Job>> {
    Ok(in_tube(txn, tube, state, 1)?.into_iter().next())
}

pub(crate) fn count_in_tube(
    txn: &mut dyn Transaction,
    tube: &str,
    state: StateKind,
) -> Result<u64> {
    count_prefix(txn, Keyspace::JobsByTube, &tube_prefix(tube, state))
}

/// Jobs in `state` across every tube, lowest id first.
pub(crate) fn in_state(
    txn: &mut dyn Transaction,
    state: StateKind,
    limit: usize,
) -> Result<Vec<Job>> {
    let entries =
        scan_prefix(txn, Keyspace::JobsByState, &[state.code()], limit)?;
    load(txn, entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use serde_json::json;

    use crate::store::{MemoryStore, Store};
    use crate::types::states::JobState;

    fn job(id: u64, tube: &str, priority: u32, state: JobState) -> Job {
        Job {
            id,
            tube: tube.into(),
            data: json!({ "n": id }),
            priority,
            state,
            created_at: Utc::now(),
            reserves: 0,
            releases: 0,
            buries: 0,
            kicks: 0,
        }
    }

    #[test]
    fn test_index_orders_by_priority_then_id() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        let txn = txn.as_mut();

        put(txn, &job(1, "t", 1024, JobState::Ready)).unwrap();
        put(txn, &job(2, "t", 10, JobState::Ready)).unwrap();
        put(txn, &job(3, "t", 10, JobState::Ready)).unwrap();
        put(txn, &job(4, "t", 5, JobState::Buried)).unwrap();
        put(txn, &job(5, "other", 1, JobState::Ready)).unwrap();
        // 256 > 255 bytewise only if the big-endian encoding is respected.
        put(txn, &job(6, "t", 256, JobState::Ready)).unwrap();

        let ids: Vec<u64> = in_tube(txn, "t", StateKind::Ready, usize::MAX)
            .unwrap()
            .iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 6, 1]);
        assert_eq!(count_in_tube(txn, "t", StateKind::Ready).unwrap(), 4);
        assert_eq!(count_in_tube(txn, "t", StateKind::Buried).unwrap(), 1);
        assert_eq!(count_in_tube(txn, "nope", StateKind::Ready).unwrap(), 0);
    }

    #[test]
    fn test_put_moves_index_entries() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        let txn = txn.as_mut();

        let mut j = job(7, "t", 100, JobState::Ready);
        put(txn, &j).unwrap();

        j.state = JobState::Buried;
        j.priority = 3;
        put(txn, &j).unwrap();

        assert_eq!(count_in_tube(txn, "t", StateKind::Ready).unwrap(), 0);
        assert_eq!(
            first_in_tube(txn, "t", StateKind::Buried).unwrap(),
            Some(j.clone())
        );
        let buried = in_state(txn, StateKind::Buried, 10).unwrap();
        assert_eq!(buried.len(), 1);
        assert!(in_state(txn, StateKind::Ready, 10).unwrap().is_empty());

        assert_eq!(remove(txn, 7).unwrap(), Some(j));
        assert_eq!(remove(txn, 7).unwrap(), None);
        assert_eq!(count_in_tube(txn, "t", StateKind::Buried).unwrap(), 0);
        assert!(in_state(txn, StateKind::Buried, 10).unwrap().is_empty());
        assert!(matches!(fetch(txn, 7), Err(Error::NotFound { id: 7 })));
    }
}
