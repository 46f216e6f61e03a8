//! Artifact Persistence
//!
//! Generated exams are stored per user under a fixed cap. Inserts past the cap fail with
//! `LimitReached`; nothing is evicted to make room.

pub mod store;

pub use store::{ArtifactStore, MemoryArtifactStore, SledArtifactStore};

use crate::assembler::{ItemBreakdown, TemplateKind};
use crate::types::{ArtifactId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Artifact settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Saved artifacts allowed per user
    #[serde(default = "default_max_per_user")]
    pub max_per_user: usize,
}

fn default_max_per_user() -> usize {
    20
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            max_per_user: default_max_per_user(),
        }
    }
}

/// How an artifact was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub title: String,
    pub breakdown: ItemBreakdown,
    pub time_budget_minutes: u32,
    pub template: TemplateKind,
    pub provider: String,
    pub model: String,
    pub source_documents: Vec<String>,
}

/// A persisted generation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub user_id: UserId,
    pub name: String,
    pub content: String,
    pub metadata: ArtifactMetadata,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub id: ArtifactId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Generated output that has not been saved yet.
///
/// Returned inside `GenerationError::Persistence` so the save can be retried without
/// another generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingArtifact {
    pub user_id: UserId,
    pub name: String,
    pub content: String,
    pub metadata: ArtifactMetadata,
}
