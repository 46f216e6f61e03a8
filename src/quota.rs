//! Quota Gate
//!
//! Per-user credit checks. The balance is read before the expensive provider call and
//! decremented only after a successful result. The check is not a reservation: two
//! concurrent jobs for one account may both pass it, and the losing `consume` is a no-op.

pub mod store;

pub use store::{MemoryQuotaStore, QuotaStore, SledQuotaStore};

use crate::error::StorageError;
use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Quota settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Credits handed out by `quota grant` when no amount is given
    #[serde(default = "default_grant_credits")]
    pub default_grant: u32,
}

fn default_grant_credits() -> u32 {
    5
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_grant: default_grant_credits(),
        }
    }
}

#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<dyn QuotaStore>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self { store }
    }

    /// Remaining credits. Users without a record have none.
    pub fn check_available(&self, user_id: &UserId) -> Result<u32, StorageError> {
        let remaining = self.store.get_remaining(user_id)?.unwrap_or(0);
        debug!(user_id = %user_id, remaining, "Quota checked");
        Ok(remaining)
    }

    /// Take one credit after a successful generation. No-op when the balance is zero.
    pub fn consume(&self, user_id: &UserId) -> Result<bool, StorageError> {
        let consumed = self.store.decrement_if_positive(user_id)?;
        if consumed {
            info!(user_id = %user_id, "Quota credit consumed");
        } else {
            debug!(user_id = %user_id, "Quota consume was a no-op");
        }
        Ok(consumed)
    }

    /// Add `credits` to the user's balance, returning the new balance.
    pub fn grant(&self, user_id: &UserId, credits: u32) -> Result<u32, StorageError> {
        let next = self.store.increment(user_id, credits)?;
        info!(user_id = %user_id, credits, remaining = next, "Quota credits granted");
        Ok(next)
    }

    /// Overwrite the balance.
    pub fn set(&self, user_id: &UserId, remaining: u32) -> Result<(), StorageError> {
        self.store.set_remaining(user_id, remaining)
    }
}
