//! Upload Tracking
//!
//! Owns the working set of source documents for one session. Each accepted document is
//! processed by its own task; tasks only report status changes over a channel and the
//! tracker applies them by item id. Only documents that reached `Uploaded` are exposed
//! to request assembly.

pub mod convert;
pub mod state;

pub use convert::{DocumentConverter, DocumentFormat, MarkupConverter, SourceDocument};
pub use state::{UploadItem, UploadStatus};

use crate::error::CapacityError;
use crate::provider::{GenerationService, PreparedDocument};
use crate::types::{ItemId, RemoteRef};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Upload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum number of live documents per session
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_max_files() -> usize {
    10
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
        }
    }
}

/// A document turned away because the session was full
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedDocument {
    pub name: String,
    pub reason: CapacityError,
}

/// Result of one `submit` call
#[derive(Debug, Clone, Default)]
pub struct SubmitOutcome {
    pub accepted: Vec<ItemId>,
    pub rejected: Vec<RejectedDocument>,
}

#[derive(Debug)]
struct ItemReport {
    id: ItemId,
    status: UploadStatus,
}

/// Shared between the tracker and the task applying reports for a submission.
struct TrackerState {
    service: Arc<dyn GenerationService>,
    items: RwLock<Vec<UploadItem>>,
}

impl TrackerState {
    async fn apply(&self, report: ItemReport) {
        let orphan = {
            let mut items = self.items.write();
            match items.iter_mut().find(|item| item.id == report.id) {
                Some(item) => {
                    if item.status.can_transition_to(&report.status) {
                        debug!(
                            item_id = %item.id,
                            from = item.status.label(),
                            to = report.status.label(),
                            "Upload item transition"
                        );
                        match &report.status {
                            UploadStatus::Uploaded { remote } => {
                                info!(item_id = %item.id, name = %item.name, remote = %remote, "Document uploaded")
                            }
                            UploadStatus::Error { reason } => {
                                warn!(item_id = %item.id, name = %item.name, reason = %reason, "Document failed")
                            }
                            _ => {}
                        }
                        item.status = report.status;
                        None
                    } else {
                        warn!(
                            item_id = %item.id,
                            from = item.status.label(),
                            to = report.status.label(),
                            "Ignoring illegal upload transition"
                        );
                        // An item already failed or removed cannot keep a late upload.
                        report.status.remote_ref().cloned()
                    }
                }
                // Removed while in flight; anything it uploaded is now orphaned.
                None => report.status.remote_ref().cloned(),
            }
        };

        if let Some(remote) = orphan {
            self.delete_remote_best_effort(&remote).await;
        }
    }

    /// Fail accepted items whose task ended without a terminal report.
    fn abort_unfinished(&self, accepted: &[ItemId]) {
        let mut items = self.items.write();
        for item in items.iter_mut() {
            if accepted.contains(&item.id) && item.status.is_in_flight() {
                warn!(item_id = %item.id, name = %item.name, "Upload task ended without a result");
                item.status = UploadStatus::Error {
                    reason: "processing aborted".to_string(),
                };
            }
        }
    }

    async fn delete_remote_best_effort(&self, remote: &RemoteRef) {
        if let Err(e) = self.service.delete(remote).await {
            warn!(remote = %remote, error = %e, "Remote document delete failed");
        }
    }
}

pub struct UploadTracker {
    state: Arc<TrackerState>,
    converter: Arc<dyn DocumentConverter>,
    max_files: usize,
    next_id: AtomicU64,
}

impl UploadTracker {
    pub fn new(service: Arc<dyn GenerationService>, config: &UploadConfig) -> Self {
        Self::with_converter(service, Arc::new(MarkupConverter), config)
    }

    pub fn with_converter(
        service: Arc<dyn GenerationService>,
        converter: Arc<dyn DocumentConverter>,
        config: &UploadConfig,
    ) -> Self {
        Self {
            state: Arc::new(TrackerState {
                service,
                items: RwLock::new(Vec::new()),
            }),
            converter,
            max_files: config.max_files,
            next_id: AtomicU64::new(1),
        }
    }

    /// Slots left before `max_files` live documents. Failed items do not hold a slot.
    pub fn capacity_remaining(&self) -> usize {
        let live = self
            .state
            .items
            .read()
            .iter()
            .filter(|item| item.status.last_error().is_none())
            .count();
        self.max_files.saturating_sub(live)
    }

    /// Accept as many documents as there are free slots, process them concurrently and
    /// return once every accepted document reached `Uploaded` or `Error`.
    ///
    /// Reports are applied by a spawned task, so dropping this future does not strand
    /// items: they still settle, and uploads for removed items are still deleted.
    pub async fn submit(&self, documents: Vec<SourceDocument>) -> SubmitOutcome {
        let mut outcome = SubmitOutcome::default();
        let mut work = Vec::new();

        {
            let mut items = self.state.items.write();
            let live = items
                .iter()
                .filter(|item| item.status.last_error().is_none())
                .count();
            let remaining = self.max_files.saturating_sub(live);

            for (index, document) in documents.into_iter().enumerate() {
                if index >= remaining {
                    outcome.rejected.push(RejectedDocument {
                        name: document.name,
                        reason: CapacityError::UploadSlots {
                            max_files: self.max_files,
                            remaining,
                        },
                    });
                    continue;
                }
                let id = ItemId::from_u64(self.next_id.fetch_add(1, Ordering::Relaxed));
                items.push(UploadItem {
                    id,
                    name: document.name.clone(),
                    size_bytes: document.content.len() as u64,
                    digest: hex::encode(blake3::hash(&document.content).as_bytes()),
                    status: UploadStatus::Queued,
                    submitted_at: Utc::now(),
                });
                outcome.accepted.push(id);
                work.push((id, document));
            }
        }

        if !outcome.rejected.is_empty() {
            warn!(
                rejected = outcome.rejected.len(),
                max_files = self.max_files,
                "Upload slots exhausted, documents rejected"
            );
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        for (id, document) in work {
            let service = self.state.service.clone();
            let converter = self.converter.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                process_item(id, document, service, converter, tx).await;
            });
        }
        drop(tx);

        let state = self.state.clone();
        let accepted = outcome.accepted.clone();
        let applier = tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                state.apply(report).await;
            }
            state.abort_unfinished(&accepted);
        });
        if let Err(e) = applier.await {
            warn!(error = %e, "Upload report task failed");
            self.state.abort_unfinished(&outcome.accepted);
        }

        outcome
    }

    /// Remove an item. Uploaded documents are deleted remotely first (best-effort).
    /// Returns false when the item does not exist or is already being deleted.
    pub async fn remove(&self, id: ItemId) -> bool {
        let remote = {
            let mut items = self.state.items.write();
            let Some(position) = items.iter().position(|item| item.id == id) else {
                return false;
            };
            match items[position].status.clone() {
                UploadStatus::Uploaded { remote } => {
                    items[position].status = UploadStatus::Deleting {
                        remote: remote.clone(),
                    };
                    remote
                }
                UploadStatus::Deleting { .. } => return false,
                _ => {
                    items.remove(position);
                    debug!(item_id = %id, "Upload item removed");
                    return true;
                }
            }
        };

        self.state.delete_remote_best_effort(&remote).await;
        self.state.items.write().retain(|item| item.id != id);
        info!(item_id = %id, "Upload item removed");
        true
    }

    /// Remove every uploaded item, deleting the remote copies. Returns how many were removed.
    pub async fn remove_uploaded(&self) -> usize {
        let ids: Vec<ItemId> = self
            .state
            .items
            .read()
            .iter()
            .filter(|item| matches!(item.status, UploadStatus::Uploaded { .. }))
            .map(|item| item.id)
            .collect();
        let mut removed = 0;
        for id in ids {
            if self.remove(id).await {
                removed += 1;
            }
        }
        removed
    }

    /// Remote references of every `Uploaded` item, in submission order.
    pub fn ready_documents(&self) -> Vec<RemoteRef> {
        self.state
            .items
            .read()
            .iter()
            .filter_map(|item| match &item.status {
                UploadStatus::Uploaded { remote } => Some(remote.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn items(&self) -> Vec<UploadItem> {
        self.state.items.read().clone()
    }

    pub fn get(&self, id: ItemId) -> Option<UploadItem> {
        self.state
            .items
            .read()
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    /// Drop settled items after a completed job. In-flight and deleting items stay.
    pub fn clear(&self) {
        let mut items = self.state.items.write();
        let before = items.len();
        items.retain(|item| {
            item.status.is_in_flight() || matches!(item.status, UploadStatus::Deleting { .. })
        });
        debug!(cleared = before - items.len(), "Upload working set cleared");
    }
}

async fn process_item(
    id: ItemId,
    document: SourceDocument,
    service: Arc<dyn GenerationService>,
    converter: Arc<dyn DocumentConverter>,
    tx: mpsc::UnboundedSender<ItemReport>,
) {
    let report = |status: UploadStatus| {
        let _ = tx.send(ItemReport { id, status });
    };

    if document.content.is_empty() {
        report(UploadStatus::Error {
            reason: format!("{} is empty", document.name),
        });
        return;
    }

    let prepared = match DocumentFormat::from_name(&document.name) {
        DocumentFormat::Unsupported => {
            report(UploadStatus::Error {
                reason: format!("Unsupported document format: {}", document.name),
            });
            return;
        }
        DocumentFormat::Native { mime_type } => PreparedDocument {
            name: document.name,
            mime_type: mime_type.to_string(),
            content: document.content,
        },
        DocumentFormat::Markup => {
            report(UploadStatus::Converting);
            match converter.convert(&document) {
                Ok(prepared) => prepared,
                Err(reason) => {
                    report(UploadStatus::Error {
                        reason: format!("Conversion failed: {}", reason),
                    });
                    return;
                }
            }
        }
    };

    report(UploadStatus::Uploading);
    match service.upload(&prepared).await {
        Ok(remote) => report(UploadStatus::Uploaded { remote }),
        Err(e) => report(UploadStatus::Error {
            reason: e.to_string(),
        }),
    }
}
