//! Per-user credit counters.

use crate::error::StorageError;
use crate::types::UserId;
use parking_lot::Mutex;
use std::collections::HashMap;

const TREE_QUOTA: &str = "quota_remaining";

/// Quota store contract
///
/// `decrement_if_positive` must be a single conditional update at the storage layer.
pub trait QuotaStore: Send + Sync {
    /// Remaining credits, or `None` when the user has no record.
    fn get_remaining(&self, user_id: &UserId) -> Result<Option<u32>, StorageError>;

    /// Take one credit if any remain. Returns whether a credit was taken.
    fn decrement_if_positive(&self, user_id: &UserId) -> Result<bool, StorageError>;

    /// Add `credits` in one conditional update and return the new balance. A user
    /// without a record starts from zero.
    fn increment(&self, user_id: &UserId, credits: u32) -> Result<u32, StorageError>;

    /// Overwrite the balance (replenishment).
    fn set_remaining(&self, user_id: &UserId, remaining: u32) -> Result<(), StorageError>;
}

/// In-process quota store
#[derive(Default)]
pub struct MemoryQuotaStore {
    balances: Mutex<HashMap<UserId, u32>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QuotaStore for MemoryQuotaStore {
    fn get_remaining(&self, user_id: &UserId) -> Result<Option<u32>, StorageError> {
        Ok(self.balances.lock().get(user_id).copied())
    }

    fn decrement_if_positive(&self, user_id: &UserId) -> Result<bool, StorageError> {
        let mut balances = self.balances.lock();
        match balances.get_mut(user_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn increment(&self, user_id: &UserId, credits: u32) -> Result<u32, StorageError> {
        let mut balances = self.balances.lock();
        let remaining = balances.entry(user_id.clone()).or_insert(0);
        *remaining = remaining.saturating_add(credits);
        Ok(*remaining)
    }

    fn set_remaining(&self, user_id: &UserId, remaining: u32) -> Result<(), StorageError> {
        self.balances.lock().insert(user_id.clone(), remaining);
        Ok(())
    }
}

/// Sled-backed quota store; decrements are compare-and-swap on the user's counter
#[derive(Clone)]
pub struct SledQuotaStore {
    tree: sled::Tree,
}

impl SledQuotaStore {
    pub fn new(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(TREE_QUOTA)?;
        Ok(Self { tree })
    }

    fn decode(raw: &[u8]) -> Result<u32, StorageError> {
        let bytes: [u8; 4] = raw.try_into().map_err(|_| {
            StorageError::Serialization(format!("quota counter has {} bytes, expected 4", raw.len()))
        })?;
        Ok(u32::from_be_bytes(bytes))
    }
}

impl QuotaStore for SledQuotaStore {
    fn get_remaining(&self, user_id: &UserId) -> Result<Option<u32>, StorageError> {
        match self.tree.get(user_id.as_str().as_bytes())? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn decrement_if_positive(&self, user_id: &UserId) -> Result<bool, StorageError> {
        let key = user_id.as_str().as_bytes();
        loop {
            let Some(current) = self.tree.get(key)? else {
                return Ok(false);
            };
            let remaining = Self::decode(&current)?;
            if remaining == 0 {
                return Ok(false);
            }
            let next = (remaining - 1).to_be_bytes();
            match self
                .tree
                .compare_and_swap(key, Some(current), Some(&next[..]))?
            {
                Ok(()) => {
                    self.tree.flush()?;
                    return Ok(true);
                }
                Err(_) => continue,
            }
        }
    }

    fn increment(&self, user_id: &UserId, credits: u32) -> Result<u32, StorageError> {
        let key = user_id.as_str().as_bytes();
        loop {
            let current = self.tree.get(key)?;
            let remaining = match &current {
                Some(raw) => Self::decode(raw)?,
                None => 0,
            };
            let next = remaining.saturating_add(credits);
            match self
                .tree
                .compare_and_swap(key, current, Some(&next.to_be_bytes()[..]))?
            {
                Ok(()) => {
                    self.tree.flush()?;
                    return Ok(next);
                }
                Err(_) => continue,
            }
        }
    }

    fn set_remaining(&self, user_id: &UserId, remaining: u32) -> Result<(), StorageError> {
        self.tree
            .insert(user_id.as_str().as_bytes(), &remaining.to_be_bytes()[..])?;
        self.tree.flush()?;
        Ok(())
    }
}
