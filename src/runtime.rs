//! Composition root.
//!
//! Opens the sled database once, builds the generation service client once and wires
//! every component from the same handles.

use crate::admission::{AdmissionController, SledLeaseStore};
use crate::artifact::{ArtifactStore, SledArtifactStore};
use crate::config::ExamgenConfig;
use crate::error::{ApiError, StorageError};
use crate::orchestrator::GenerationOrchestrator;
use crate::provider::{GenerationService, HttpGenerationService};
use crate::quota::{QuotaGate, SledQuotaStore};
use crate::upload::UploadTracker;
use std::sync::Arc;
use tracing::info;

pub struct Runtime {
    config: ExamgenConfig,
    db: sled::Db,
    service: Arc<dyn GenerationService>,
    quota: QuotaGate,
    artifacts: Arc<dyn ArtifactStore>,
    orchestrator: GenerationOrchestrator,
}

impl Runtime {
    /// Build everything with the HTTP generation client.
    pub fn open(config: ExamgenConfig) -> Result<Self, ApiError> {
        config.ensure_valid()?;
        let service: Arc<dyn GenerationService> = Arc::new(HttpGenerationService::new(&config.provider)?);
        Self::with_service(config, service)
    }

    /// Build everything around an already constructed service.
    pub fn with_service(
        config: ExamgenConfig,
        service: Arc<dyn GenerationService>,
    ) -> Result<Self, ApiError> {
        config.ensure_valid()?;

        let db_path = config.storage.db_path();
        std::fs::create_dir_all(&db_path).map_err(StorageError::IoError)?;
        let db = sled::open(&db_path).map_err(StorageError::from)?;

        let admission = AdmissionController::new(
            Arc::new(SledLeaseStore::new(&db)?),
            &config.admission,
        );
        let quota = QuotaGate::new(Arc::new(SledQuotaStore::new(&db)?));
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(SledArtifactStore::new(
            &db,
            config.artifacts.max_per_user,
        )?);

        let orchestrator = GenerationOrchestrator::new(
            service.clone(),
            admission,
            quota.clone(),
            artifacts.clone(),
            config.provider.generation_options(),
        );

        info!(
            db_path = %db_path.display(),
            provider = service.provider_name(),
            capacity = config.admission.capacity,
            "Runtime ready"
        );

        Ok(Self {
            config,
            db,
            service,
            quota,
            artifacts,
            orchestrator,
        })
    }

    pub fn config(&self) -> &ExamgenConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &GenerationOrchestrator {
        &self.orchestrator
    }

    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// A fresh upload working set sharing this runtime's service client.
    pub fn upload_tracker(&self) -> UploadTracker {
        UploadTracker::new(self.service.clone(), &self.config.uploads)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
