//! Artifact stores.

use super::{Artifact, ArtifactMetadata, ArtifactSummary};
use crate::error::StorageError;
use crate::types::{ArtifactId, UserId};
use chrono::Utc;
use parking_lot::Mutex;

const TREE_ARTIFACTS: &str = "artifacts";
const TREE_USER_INDEX: &str = "artifact_index";

/// Artifact store contract
pub trait ArtifactStore: Send + Sync {
    /// Save a new artifact. Fails with `LimitReached` when the user is at the cap.
    fn insert(
        &self,
        user_id: &UserId,
        name: &str,
        content: &str,
        metadata: &ArtifactMetadata,
    ) -> Result<ArtifactId, StorageError>;

    /// Summaries of the user's artifacts, oldest first.
    fn list_by_user(&self, user_id: &UserId) -> Result<Vec<ArtifactSummary>, StorageError>;

    /// Full artifact, if it belongs to `user_id`.
    fn get(&self, artifact_id: &ArtifactId, user_id: &UserId) -> Result<Artifact, StorageError>;

    /// Delete an artifact owned by `user_id`.
    fn delete(&self, artifact_id: &ArtifactId, user_id: &UserId) -> Result<(), StorageError>;

    fn count(&self, user_id: &UserId) -> Result<usize, StorageError>;
}

fn build_artifact(user_id: &UserId, name: &str, content: &str, metadata: &ArtifactMetadata) -> Artifact {
    Artifact {
        id: ArtifactId::new(),
        user_id: user_id.clone(),
        name: name.to_string(),
        content: content.to_string(),
        metadata: metadata.clone(),
        created_at: Utc::now(),
    }
}

fn check_owner(artifact: &Artifact, user_id: &UserId) -> Result<(), StorageError> {
    if &artifact.user_id != user_id {
        return Err(StorageError::NotOwner {
            artifact_id: artifact.id,
            user_id: user_id.clone(),
        });
    }
    Ok(())
}

/// In-process artifact store
pub struct MemoryArtifactStore {
    max_per_user: usize,
    artifacts: Mutex<Vec<Artifact>>,
}

impl MemoryArtifactStore {
    pub fn new(max_per_user: usize) -> Self {
        Self {
            max_per_user,
            artifacts: Mutex::new(Vec::new()),
        }
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn insert(
        &self,
        user_id: &UserId,
        name: &str,
        content: &str,
        metadata: &ArtifactMetadata,
    ) -> Result<ArtifactId, StorageError> {
        let mut artifacts = self.artifacts.lock();
        let owned = artifacts.iter().filter(|a| &a.user_id == user_id).count();
        if owned >= self.max_per_user {
            return Err(StorageError::LimitReached {
                limit: self.max_per_user,
            });
        }
        let artifact = build_artifact(user_id, name, content, metadata);
        let id = artifact.id;
        artifacts.push(artifact);
        Ok(id)
    }

    fn list_by_user(&self, user_id: &UserId) -> Result<Vec<ArtifactSummary>, StorageError> {
        Ok(self
            .artifacts
            .lock()
            .iter()
            .filter(|a| &a.user_id == user_id)
            .map(Artifact::summary)
            .collect())
    }

    fn get(&self, artifact_id: &ArtifactId, user_id: &UserId) -> Result<Artifact, StorageError> {
        let artifacts = self.artifacts.lock();
        let artifact = artifacts
            .iter()
            .find(|a| &a.id == artifact_id)
            .ok_or_else(|| StorageError::NotFound(artifact_id.to_string()))?;
        check_owner(artifact, user_id)?;
        Ok(artifact.clone())
    }

    fn delete(&self, artifact_id: &ArtifactId, user_id: &UserId) -> Result<(), StorageError> {
        let mut artifacts = self.artifacts.lock();
        let position = artifacts
            .iter()
            .position(|a| &a.id == artifact_id)
            .ok_or_else(|| StorageError::NotFound(artifact_id.to_string()))?;
        check_owner(&artifacts[position], user_id)?;
        artifacts.remove(position);
        Ok(())
    }

    fn count(&self, user_id: &UserId) -> Result<usize, StorageError> {
        Ok(self
            .artifacts
            .lock()
            .iter()
            .filter(|a| &a.user_id == user_id)
            .count())
    }
}

/// Sled-backed artifact store.
///
/// Bodies live in `artifacts` keyed by id. Each user has an id list in `artifact_index`;
/// the cap is enforced by a conditional swap on that list.
#[derive(Clone)]
pub struct SledArtifactStore {
    artifacts: sled::Tree,
    index: sled::Tree,
    max_per_user: usize,
}

impl SledArtifactStore {
    pub fn new(db: &sled::Db, max_per_user: usize) -> Result<Self, StorageError> {
        Ok(Self {
            artifacts: db.open_tree(TREE_ARTIFACTS)?,
            index: db.open_tree(TREE_USER_INDEX)?,
            max_per_user,
        })
    }

    fn read_index(&self, user_id: &UserId) -> Result<Vec<ArtifactId>, StorageError> {
        match self.index.get(user_id.as_str().as_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn update_index<T, F>(&self, user_id: &UserId, mut update: F) -> Result<T, StorageError>
    where
        F: FnMut(&mut Vec<ArtifactId>) -> Result<(bool, T), StorageError>,
    {
        let key = user_id.as_str().as_bytes();
        loop {
            let current = self.index.get(key)?;
            let mut ids: Vec<ArtifactId> = match &current {
                Some(bytes) => bincode::deserialize(bytes)?,
                None => Vec::new(),
            };
            let (changed, out) = update(&mut ids)?;
            if !changed {
                return Ok(out);
            }
            let next = bincode::serialize(&ids)?;
            if self.index.compare_and_swap(key, current, Some(next))?.is_ok() {
                return Ok(out);
            }
        }
    }

    fn load(&self, artifact_id: &ArtifactId) -> Result<Artifact, StorageError> {
        let bytes = self
            .artifacts
            .get(artifact_id.as_uuid().as_bytes())?
            .ok_or_else(|| StorageError::NotFound(artifact_id.to_string()))?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

impl ArtifactStore for SledArtifactStore {
    fn insert(
        &self,
        user_id: &UserId,
        name: &str,
        content: &str,
        metadata: &ArtifactMetadata,
    ) -> Result<ArtifactId, StorageError> {
        let artifact = build_artifact(user_id, name, content, metadata);
        let id = artifact.id;
        let body = bincode::serialize(&artifact)?;

        let max = self.max_per_user;
        self.update_index(user_id, |ids| {
            if ids.len() >= max {
                return Err(StorageError::LimitReached { limit: max });
            }
            ids.push(id);
            Ok((true, ()))
        })?;

        if let Err(e) = self.artifacts.insert(id.as_uuid().as_bytes(), body) {
            self.update_index(user_id, |ids| {
                let before = ids.len();
                ids.retain(|existing| existing != &id);
                Ok((ids.len() != before, ()))
            })?;
            return Err(e.into());
        }
        self.artifacts.flush()?;
        Ok(id)
    }

    fn list_by_user(&self, user_id: &UserId) -> Result<Vec<ArtifactSummary>, StorageError> {
        let mut summaries = Vec::new();
        for id in self.read_index(user_id)? {
            match self.load(&id) {
                Ok(artifact) => summaries.push(artifact.summary()),
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }

    fn get(&self, artifact_id: &ArtifactId, user_id: &UserId) -> Result<Artifact, StorageError> {
        let artifact = self.load(artifact_id)?;
        check_owner(&artifact, user_id)?;
        Ok(artifact)
    }

    fn delete(&self, artifact_id: &ArtifactId, user_id: &UserId) -> Result<(), StorageError> {
        let artifact = self.load(artifact_id)?;
        check_owner(&artifact, user_id)?;

        self.update_index(user_id, |ids| {
            let before = ids.len();
            ids.retain(|existing| existing != artifact_id);
            Ok((ids.len() != before, ()))
        })?;
        self.artifacts.remove(artifact_id.as_uuid().as_bytes())?;
        self.artifacts.flush()?;
        Ok(())
    }

    fn count(&self, user_id: &UserId) -> Result<usize, StorageError> {
        Ok(self.read_index(user_id)?.len())
    }
}
