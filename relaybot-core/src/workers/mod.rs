//! Bulk-synchronous worker rounds.
//!
//! A round snapshots its pool, claims at most `max_workers * batch_size`
//! entries (removing them from the pool before any processing), runs one
//! task per batch, and waits for all of them before the next snapshot.

pub mod database_worker;
pub mod object_worker;

pub use database_worker::DatabaseWorker;
pub use object_worker::ObjectWorker;

use crate::pool::{KeyedPool, PoolKey};
use std::time::Duration;
use tokio::sync::watch;

/// Claims up to `max_workers` batches of up to `batch_size` entries.
///
/// Entries are taken in key order. Claimed entries are gone from the pool
/// whatever their processing outcome.
pub fn claim_batches<T: PoolKey + Clone>(
    pool: &KeyedPool<T>,
    max_workers: usize,
    batch_size: usize,
) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let keys = pending_keys(pool, max_workers.max(1) * batch_size);
    claim(pool, &keys, batch_size)
}

/// The first `limit` keys of a snapshot, in key order.
fn pending_keys<T: PoolKey + Clone>(pool: &KeyedPool<T>, limit: usize) -> Vec<String> {
    let mut keys: Vec<String> = pool.snapshot().into_keys().collect();
    keys.sort();
    keys.truncate(limit);
    keys
}

/// Removes `keys` from the pool and groups the removed entries.
///
/// The removed value is the live one, so an overwrite that landed after
/// the snapshot is processed instead of lost.
fn claim<T: PoolKey + Clone>(
    pool: &KeyedPool<T>,
    keys: &[String],
    batch_size: usize,
) -> Vec<Vec<T>> {
    let claimed: Vec<T> = keys.iter().filter_map(|key| pool.remove(key)).collect();
    claimed
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Sleeps for `idle`, waking early on shutdown. Returns `true` if shutdown
/// was requested.
pub(crate) async fn idle_or_shutdown(idle: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(idle) => {}
        _ = shutdown.changed() => {}
    }
    *shutdown.borrow()
}
