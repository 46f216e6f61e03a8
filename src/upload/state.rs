//! Upload item state machine.
//!
//! `Queued -> Converting? -> Uploading -> Uploaded -> Deleting`, with `Error` reachable
//! from every state before `Uploaded`. `Error` is terminal.

use crate::types::{ItemId, RemoteRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one upload item. The remote reference lives inside the states that have one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Queued,
    Converting,
    Uploading,
    Uploaded { remote: RemoteRef },
    Deleting { remote: RemoteRef },
    Error { reason: String },
}

impl UploadStatus {
    pub fn label(&self) -> &'static str {
        match self {
            UploadStatus::Queued => "queued",
            UploadStatus::Converting => "converting",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Uploaded { .. } => "uploaded",
            UploadStatus::Deleting { .. } => "deleting",
            UploadStatus::Error { .. } => "error",
        }
    }

    pub fn remote_ref(&self) -> Option<&RemoteRef> {
        match self {
            UploadStatus::Uploaded { remote } | UploadStatus::Deleting { remote } => Some(remote),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            UploadStatus::Error { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            UploadStatus::Queued | UploadStatus::Converting | UploadStatus::Uploading
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: &UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (Queued, Converting) | (Queued, Uploading) => true,
            (Converting, Uploading) => true,
            (Uploading, Uploaded { .. }) => true,
            (Uploaded { remote }, Deleting { remote: next_remote }) => remote == next_remote,
            (Queued | Converting | Uploading, Error { .. }) => true,
            _ => false,
        }
    }
}

/// One submitted source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadItem {
    pub id: ItemId,
    pub name: String,
    pub size_bytes: u64,
    /// blake3 digest of the submitted bytes, hex encoded
    pub digest: String,
    pub status: UploadStatus,
    pub submitted_at: DateTime<Utc>,
}
