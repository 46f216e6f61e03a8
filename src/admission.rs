//! Admission Control
//!
//! Global leasing gate that bounds how many generation jobs run at once across every
//! process sharing the lease store. A job holds a [`LeaseGuard`] for its whole run; the
//! guard hands the slot back when it is released or dropped, and the lease TTL reclaims
//! slots held by processes that died mid-job.

pub mod store;

pub use store::{Lease, LeaseStore, MemoryLeaseStore, SledLeaseStore};

use crate::error::{AdmissionError, StorageError};
use crate::types::JobId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Admission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Global number of concurrent generation jobs
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Lease lifetime; must exceed the longest plausible job
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// How long a job waits for a slot before giving up
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    /// First backoff ceiling between attempts (milliseconds)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Largest backoff ceiling between attempts (milliseconds)
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_capacity() -> usize {
    4
}

fn default_lease_ttl_secs() -> u64 {
    15 * 60
}

fn default_wait_timeout_secs() -> u64 {
    60
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            lease_ttl_secs: default_lease_ttl_secs(),
            wait_timeout_secs: default_wait_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl AdmissionConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be at least 1".to_string());
        }
        if self.backoff_base_ms == 0 {
            return Err("backoff_base_ms must be at least 1".to_string());
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err("backoff_max_ms must not be below backoff_base_ms".to_string());
        }
        if self.lease_ttl_secs <= self.wait_timeout_secs {
            return Err(format!(
                "lease_ttl_secs ({}) must exceed wait_timeout_secs ({})",
                self.lease_ttl_secs, self.wait_timeout_secs
            ));
        }
        Ok(())
    }
}

/// Backoff before the next attempt: a random delay in the upper half of an
/// exponentially growing ceiling.
pub(crate) fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis().max(1) as u64;
    let max_ms = (max.as_millis() as u64).max(base_ms);
    let ceiling = base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms);
    let floor = (ceiling / 2).max(1);
    Duration::from_millis(rand::rng().random_range(floor..=ceiling.max(floor)))
}

/// Global admission controller
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn LeaseStore>,
    capacity: usize,
    lease_ttl: Duration,
    wait_timeout: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn LeaseStore>, config: &AdmissionConfig) -> Self {
        Self {
            store,
            capacity: config.capacity,
            lease_ttl: config.lease_ttl(),
            wait_timeout: config.wait_timeout(),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Override the lease TTL (short TTLs are useful in tests).
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Override the backoff bounds.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Unexpired leases currently granted across all holders.
    pub fn outstanding(&self) -> Result<usize, StorageError> {
        self.store.outstanding()
    }

    /// Wait up to the configured timeout for a slot.
    pub async fn acquire(&self, holder_id: JobId) -> Result<LeaseGuard, AdmissionError> {
        self.acquire_within(holder_id, self.wait_timeout).await
    }

    /// Wait up to `timeout` for a slot, backing off with jitter between attempts.
    pub async fn acquire_within(
        &self,
        holder_id: JobId,
        timeout: Duration,
    ) -> Result<LeaseGuard, AdmissionError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempt: u32 = 0;

        loop {
            if let Some(lease) = self
                .store
                .try_acquire(holder_id, self.capacity, self.lease_ttl)?
            {
                info!(
                    job_id = %holder_id,
                    lease_id = %lease.lease_id,
                    attempts = attempt + 1,
                    waited_ms = started.elapsed().as_millis(),
                    "Admission lease acquired"
                );
                return Ok(LeaseGuard {
                    store: self.store.clone(),
                    lease,
                    released: false,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now - started;
                warn!(
                    job_id = %holder_id,
                    capacity = self.capacity,
                    waited_ms = waited.as_millis(),
                    "Admission wait timed out"
                );
                return Err(AdmissionError::Timeout {
                    waited,
                    capacity: self.capacity,
                });
            }

            let delay =
                backoff_delay(attempt, self.backoff_base, self.backoff_max).min(deadline - now);
            debug!(
                job_id = %holder_id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis(),
                "Admission at capacity, backing off"
            );
            sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }
}

/// Scoped ownership of one admission lease.
///
/// The lease goes back to the store exactly once: on [`LeaseGuard::release`] or,
/// failing that, on drop (error paths, cancellation, panics).
pub struct LeaseGuard {
    store: Arc<dyn LeaseStore>,
    lease: Lease,
    released: bool,
}

impl LeaseGuard {
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Release now and report store errors to the caller.
    pub fn release(mut self) -> Result<(), StorageError> {
        self.released = true;
        let result = self.store.release(&self.lease.lease_id);
        if result.is_ok() {
            debug!(lease_id = %self.lease.lease_id, "Admission lease released");
        }
        result
    }
}

impl std::fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("lease", &self.lease)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.store.release(&self.lease.lease_id) {
            Ok(()) => debug!(lease_id = %self.lease.lease_id, "Admission lease released on drop"),
            // The TTL reclaims the slot.
            Err(e) => warn!(
                lease_id = %self.lease.lease_id,
                error = %e,
                "Failed to release admission lease"
            ),
        }
    }
}
