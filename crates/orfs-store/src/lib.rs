#![forbid(unsafe_code)]
//! Object-store port consumed by the ORFS core.
//!
//! The filesystem talks to a flat object store through the [`Pool`] trait:
//! per-object reads and writes at offsets, atomic append and truncate-write,
//! advisory exclusive locks, and pool iteration. [`Cluster`] hands out pool
//! contexts by name. [`MemPool`] is the in-process reference implementation
//! used by tests and embedders without a real cluster.

use orfs_error::{OrfsError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{trace, warn};

/// Size and modification time of one stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub mtime: SystemTime,
}

/// Aggregate statistics for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub num_objects: u64,
    pub num_bytes: u64,
}

/// One open pool context of the object store.
///
/// Offsets are absolute byte positions within the object. Every mutation is
/// atomic per call; partial progress is never reported. Missing objects
/// surface as [`OrfsError::NotFoundInStore`].
pub trait Pool: Send + Sync {
    /// Pool name, for diagnostics.
    fn name(&self) -> &str;

    /// Size and mtime of an object.
    fn stat(&self, oid: &str) -> Result<ObjectStat>;

    /// Read up to `buf.len()` bytes at `offset`. Short reads are permitted;
    /// end of object is indicated by a short (or zero) read.
    fn read(&self, oid: &str, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Write all of `data` at `offset`, extending the object as needed.
    /// Creates the object if absent.
    fn write(&self, oid: &str, data: &[u8], offset: u64) -> Result<()>;

    /// Atomically replace the entire object with `data`.
    fn write_full(&self, oid: &str, data: &[u8]) -> Result<()>;

    /// Atomically append `data`. Creates the object if absent.
    fn append(&self, oid: &str, data: &[u8]) -> Result<()>;

    /// Delete an object.
    fn delete(&self, oid: &str) -> Result<()>;

    /// Take the advisory exclusive lock `(lock_name, cookie)` on an object.
    ///
    /// Fails with [`OrfsError::LockDenied`] immediately when another cookie
    /// holds the lock; re-acquiring with the same cookie is idempotent.
    /// `duration` is the lock lifetime; `Duration::ZERO` means no expiry.
    fn lock_exclusive(
        &self,
        oid: &str,
        lock_name: &str,
        cookie: &str,
        desc: &str,
        duration: Duration,
    ) -> Result<()>;

    /// Release an advisory lock. Releasing a lock that is not held is a
    /// no-op; releasing one held by a different cookie is `LockDenied`.
    fn unlock(&self, oid: &str, lock_name: &str, cookie: &str) -> Result<()>;

    /// All object keys currently in the pool.
    fn iter_objects(&self) -> Result<Vec<String>>;

    /// Aggregate pool statistics.
    fn pool_stats(&self) -> Result<PoolStats>;
}

/// Factory for open pool contexts.
pub trait Cluster: Send + Sync {
    fn open_pool(&self, pool: &str) -> Result<Arc<dyn Pool>>;
}

// ── Exclusive lock guard ────────────────────────────────────────────────────

/// RAII holder of an object-store exclusive lock.
///
/// The lock is released when the guard is dropped, on success, error and
/// panic paths alike.
pub struct ExclusiveLock<'a> {
    pool: &'a dyn Pool,
    oid: String,
    lock_name: String,
    cookie: String,
}

impl<'a> ExclusiveLock<'a> {
    /// Acquire `(lock_name, cookie)` on `oid`, with no expiry.
    pub fn acquire(
        pool: &'a dyn Pool,
        oid: &str,
        lock_name: &str,
        cookie: &str,
        desc: &str,
    ) -> Result<Self> {
        pool.lock_exclusive(oid, lock_name, cookie, desc, Duration::ZERO)?;
        trace!(
            target: "orfs::store",
            event = "lock_acquired",
            pool = pool.name(),
            oid,
            lock_name,
            cookie
        );
        Ok(Self {
            pool,
            oid: oid.to_owned(),
            lock_name: lock_name.to_owned(),
            cookie: cookie.to_owned(),
        })
    }
}

impl Drop for ExclusiveLock<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.pool.unlock(&self.oid, &self.lock_name, &self.cookie) {
            warn!(
                target: "orfs::store",
                event = "unlock_failed",
                pool = self.pool.name(),
                oid = %self.oid,
                lock_name = %self.lock_name,
                error = %err
            );
        }
    }
}

// ── In-memory reference implementation ──────────────────────────────────────

#[derive(Debug, Clone)]
struct ObjectRecord {
    data: Vec<u8>,
    mtime: SystemTime,
}

impl ObjectRecord {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            mtime: SystemTime::now(),
        }
    }
}

#[derive(Debug, Default)]
struct MemPoolState {
    objects: HashMap<String, ObjectRecord>,
    /// Advisory locks keyed by `(oid, lock_name)`, value = holder cookie.
    locks: HashMap<(String, String), String>,
}

/// In-memory [`Pool`].
///
/// Mtimes have the platform clock's resolution, so staleness comparisons see
/// sub-second updates.
#[derive(Debug)]
pub struct MemPool {
    name: String,
    state: Mutex<MemPoolState>,
}

impl MemPool {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemPoolState::default()),
        }
    }
}

impl Pool for MemPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self, oid: &str) -> Result<ObjectStat> {
        let state = self.state.lock();
        let record = state
            .objects
            .get(oid)
            .ok_or_else(|| OrfsError::NotFoundInStore(oid.to_owned()))?;
        Ok(ObjectStat {
            size: record.data.len() as u64,
            mtime: record.mtime,
        })
    }

    fn read(&self, oid: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let state = self.state.lock();
        let record = state
            .objects
            .get(oid)
            .ok_or_else(|| OrfsError::NotFoundInStore(oid.to_owned()))?;
        let len = record.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = usize::try_from(offset)
            .map_err(|_| OrfsError::Invalid(format!("read offset {offset} does not fit usize")))?;
        let n = buf.len().min(record.data.len() - start);
        buf[..n].copy_from_slice(&record.data[start..start + n]);
        Ok(n)
    }

    fn write(&self, oid: &str, data: &[u8], offset: u64) -> Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| OrfsError::Invalid(format!("write offset {offset} does not fit usize")))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| OrfsError::Invalid("write range overflows usize".to_owned()))?;
        let mut state = self.state.lock();
        let record = state
            .objects
            .entry(oid.to_owned())
            .or_insert_with(ObjectRecord::empty);
        if record.data.len() < end {
            record.data.resize(end, 0);
        }
        record.data[start..end].copy_from_slice(data);
        record.mtime = SystemTime::now();
        trace!(target: "orfs::store", event = "write", pool = %self.name, oid, offset, len = data.len());
        Ok(())
    }

    fn write_full(&self, oid: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.objects.insert(
            oid.to_owned(),
            ObjectRecord {
                data: data.to_vec(),
                mtime: SystemTime::now(),
            },
        );
        trace!(target: "orfs::store", event = "write_full", pool = %self.name, oid, len = data.len());
        Ok(())
    }

    fn append(&self, oid: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .objects
            .entry(oid.to_owned())
            .or_insert_with(ObjectRecord::empty);
        record.data.extend_from_slice(data);
        record.mtime = SystemTime::now();
        trace!(target: "orfs::store", event = "append", pool = %self.name, oid, len = data.len());
        Ok(())
    }

    fn delete(&self, oid: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.objects.remove(oid).is_none() {
            return Err(OrfsError::NotFoundInStore(oid.to_owned()));
        }
        trace!(target: "orfs::store", event = "delete", pool = %self.name, oid);
        Ok(())
    }

    fn lock_exclusive(
        &self,
        oid: &str,
        lock_name: &str,
        cookie: &str,
        _desc: &str,
        _duration: Duration,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let key = (oid.to_owned(), lock_name.to_owned());
        match state.locks.get(&key) {
            Some(holder) if holder != cookie => Err(OrfsError::LockDenied {
                oid: oid.to_owned(),
            }),
            _ => {
                state.locks.insert(key, cookie.to_owned());
                Ok(())
            }
        }
    }

    fn unlock(&self, oid: &str, lock_name: &str, cookie: &str) -> Result<()> {
        let mut state = self.state.lock();
        let key = (oid.to_owned(), lock_name.to_owned());
        match state.locks.get(&key) {
            Some(holder) if holder == cookie => {
                state.locks.remove(&key);
                Ok(())
            }
            Some(_) => Err(OrfsError::LockDenied {
                oid: oid.to_owned(),
            }),
            None => Ok(()),
        }
    }

    fn iter_objects(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        let mut keys: Vec<String> = state.objects.keys().cloned().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn pool_stats(&self) -> Result<PoolStats> {
        let state = self.state.lock();
        let num_bytes = state
            .objects
            .values()
            .map(|record| record.data.len() as u64)
            .sum();
        Ok(PoolStats {
            num_objects: state.objects.len() as u64,
            num_bytes,
        })
    }
}

/// In-memory [`Cluster`] handing out named [`MemPool`]s on demand.
#[derive(Debug, Default)]
pub struct MemCluster {
    pools: Mutex<HashMap<String, Arc<MemPool>>>,
}

impl MemCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cluster for MemCluster {
    fn open_pool(&self, pool: &str) -> Result<Arc<dyn Pool>> {
        let mut pools = self.pools.lock();
        let pool = pools
            .entry(pool.to_owned())
            .or_insert_with(|| Arc::new(MemPool::new(pool)))
            .clone();
        Ok(pool)
    }
}
