//! Lease stores backing the admission controller.
//!
//! Both implementations keep the full lease set under one key and mutate it with a
//! conditional swap, so purge-expired, count and insert happen as one atomic step.

use crate::error::StorageError;
use crate::types::{JobId, LeaseId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TREE_LEASES: &str = "admission_leases";
const KEY_LEASE_SET: &[u8] = b"lease_set";
const MAX_LEASE_TTL_DAYS: i64 = 365;

/// One granted unit of admission capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: LeaseId,
    pub holder_id: JobId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    fn grant(holder_id: JobId, ttl: Duration, now: DateTime<Utc>) -> Self {
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::days(MAX_LEASE_TTL_DAYS))
            .min(chrono::Duration::days(MAX_LEASE_TTL_DAYS));
        Self {
            lease_id: LeaseId::new(),
            holder_id,
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Shared lease store contract
pub trait LeaseStore: Send + Sync {
    /// Grant a lease if fewer than `capacity` unexpired leases are outstanding.
    fn try_acquire(
        &self,
        holder_id: JobId,
        capacity: usize,
        ttl: Duration,
    ) -> Result<Option<Lease>, StorageError>;

    /// Drop a lease. Releasing an unknown or expired lease is a no-op.
    fn release(&self, lease_id: &LeaseId) -> Result<(), StorageError>;

    /// Number of unexpired leases right now.
    fn outstanding(&self) -> Result<usize, StorageError>;
}

fn purge_expired(leases: &mut Vec<Lease>, now: DateTime<Utc>) -> usize {
    let before = leases.len();
    leases.retain(|lease| !lease.is_expired(now));
    before - leases.len()
}

/// In-process lease store
#[derive(Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<Vec<Lease>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn try_acquire(
        &self,
        holder_id: JobId,
        capacity: usize,
        ttl: Duration,
    ) -> Result<Option<Lease>, StorageError> {
        let now = Utc::now();
        let mut leases = self.leases.lock();
        purge_expired(&mut leases, now);
        if leases.len() >= capacity {
            return Ok(None);
        }
        let lease = Lease::grant(holder_id, ttl, now);
        leases.push(lease.clone());
        Ok(Some(lease))
    }

    fn release(&self, lease_id: &LeaseId) -> Result<(), StorageError> {
        self.leases.lock().retain(|lease| &lease.lease_id != lease_id);
        Ok(())
    }

    fn outstanding(&self) -> Result<usize, StorageError> {
        let now = Utc::now();
        Ok(self
            .leases
            .lock()
            .iter()
            .filter(|lease| !lease.is_expired(now))
            .count())
    }
}

/// Sled-backed lease store using compare-and-swap on the lease set
#[derive(Clone)]
pub struct SledLeaseStore {
    tree: sled::Tree,
}

impl SledLeaseStore {
    pub fn new(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(TREE_LEASES)?;
        Ok(Self { tree })
    }

    fn decode(raw: Option<&sled::IVec>) -> Result<Vec<Lease>, StorageError> {
        match raw {
            Some(bytes) => Ok(bincode::deserialize(bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Re-run `update` until the conditional swap succeeds against the value it read.
    fn update<T, F>(&self, mut update: F) -> Result<T, StorageError>
    where
        F: FnMut(&mut Vec<Lease>) -> (bool, T),
    {
        loop {
            let current = self.tree.get(KEY_LEASE_SET)?;
            let mut leases = Self::decode(current.as_ref())?;
            let (changed, out) = update(&mut leases);
            if !changed {
                return Ok(out);
            }
            let next = bincode::serialize(&leases)?;
            match self
                .tree
                .compare_and_swap(KEY_LEASE_SET, current, Some(next))?
            {
                Ok(()) => {
                    self.tree.flush()?;
                    return Ok(out);
                }
                Err(_) => continue,
            }
        }
    }
}

impl LeaseStore for SledLeaseStore {
    fn try_acquire(
        &self,
        holder_id: JobId,
        capacity: usize,
        ttl: Duration,
    ) -> Result<Option<Lease>, StorageError> {
        self.update(|leases| {
            let now = Utc::now();
            let purged = purge_expired(leases, now);
            if leases.len() >= capacity {
                return (purged > 0, None);
            }
            let lease = Lease::grant(holder_id, ttl, now);
            leases.push(lease.clone());
            (true, Some(lease))
        })
    }

    fn release(&self, lease_id: &LeaseId) -> Result<(), StorageError> {
        self.update(|leases| {
            let before = leases.len();
            leases.retain(|lease| &lease.lease_id != lease_id);
            (leases.len() != before, ())
        })
    }

    fn outstanding(&self) -> Result<usize, StorageError> {
        let now = Utc::now();
        let leases = Self::decode(self.tree.get(KEY_LEASE_SET)?.as_ref())?;
        Ok(leases.iter().filter(|lease| !lease.is_expired(now)).count())
    }
}
