//! Shared test utilities for integration tests
//!
//! A scripted in-process generation service, a flaky artifact store and helpers that
//! wire an orchestrator over in-memory stores.

use async_trait::async_trait;
use examgen::admission::{AdmissionConfig, AdmissionController, LeaseStore, MemoryLeaseStore};
use examgen::artifact::{
    Artifact, ArtifactMetadata, ArtifactStore, ArtifactSummary, MemoryArtifactStore,
};
use examgen::assembler::{ExamSpec, GenerationRequest};
use examgen::error::{ProviderError, StorageError};
use examgen::orchestrator::{GenerationOrchestrator, JobRequest};
use examgen::provider::{GenerationOptions, GenerationService, PreparedDocument, ResponseEnvelope};
use examgen::quota::{MemoryQuotaStore, QuotaGate, QuotaStore};
use examgen::types::{ArtifactId, RemoteRef, UserId};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Generation service whose answers are scripted per call.
///
/// Unscripted `generate` calls answer with [`ScriptedService::DEFAULT_EXAM`] in the primary
/// response shape.
pub struct ScriptedService {
    responses: Mutex<VecDeque<Result<serde_json::Value, ProviderError>>>,
    generate_delay: Duration,
    failing_uploads: Vec<String>,
    upload_delay: Duration,
    pub generate_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub uploads: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<RemoteRef>>,
    pub last_request: Mutex<Option<GenerationRequest>>,
}

impl ScriptedService {
    pub const DEFAULT_EXAM: &'static str = "# Cell Biology\n\n## Answer Key\n1. A";

    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            generate_delay: Duration::ZERO,
            failing_uploads: Vec::new(),
            upload_delay: Duration::ZERO,
            generate_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = delay;
        self
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn with_failing_upload(mut self, name: &str) -> Self {
        self.failing_uploads.push(name.to_string());
        self
    }

    /// Queue the raw JSON body of the next `generate` response.
    pub fn respond_with(self, body: serde_json::Value) -> Self {
        self.responses.lock().push_back(Ok(body));
        self
    }

    /// Queue a failure for the next `generate` call.
    pub fn fail_with(self, error: ProviderError) -> Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn upload(&self, document: &PreparedDocument) -> Result<RemoteRef, ProviderError> {
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        if self.failing_uploads.contains(&document.name) {
            return Err(ProviderError::Transport(format!(
                "upload of {} reset by peer",
                document.name
            )));
        }
        self.uploads.lock().push(document.name.clone());
        Ok(RemoteRef::new(
            format!("files/{}", document.name),
            document.mime_type.clone(),
        ))
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        _options: &GenerationOptions,
    ) -> Result<ResponseEnvelope, ProviderError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());

        if !self.generate_delay.is_zero() {
            tokio::time::sleep(self.generate_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.responses.lock().pop_front();
        match scripted {
            Some(Ok(body)) => Ok(ResponseEnvelope::from_json(body)),
            Some(Err(e)) => Err(e),
            None => Ok(ResponseEnvelope::from_json(
                json!({ "text": Self::DEFAULT_EXAM }),
            )),
        }
    }

    async fn delete(&self, remote: &RemoteRef) -> Result<(), ProviderError> {
        self.deleted.lock().push(remote.clone());
        Ok(())
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

/// Artifact store whose first `failures` inserts fail with a backend error.
pub struct FlakyArtifactStore {
    inner: MemoryArtifactStore,
    failures: AtomicUsize,
}

impl FlakyArtifactStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryArtifactStore::new(10),
            failures: AtomicUsize::new(failures),
        }
    }
}

impl ArtifactStore for FlakyArtifactStore {
    fn insert(
        &self,
        user_id: &UserId,
        name: &str,
        content: &str,
        metadata: &ArtifactMetadata,
    ) -> Result<ArtifactId, StorageError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Backend("disk full".to_string()));
        }
        self.inner.insert(user_id, name, content, metadata)
    }

    fn list_by_user(&self, user_id: &UserId) -> Result<Vec<ArtifactSummary>, StorageError> {
        self.inner.list_by_user(user_id)
    }

    fn get(&self, artifact_id: &ArtifactId, user_id: &UserId) -> Result<Artifact, StorageError> {
        self.inner.get(artifact_id, user_id)
    }

    fn delete(&self, artifact_id: &ArtifactId, user_id: &UserId) -> Result<(), StorageError> {
        self.inner.delete(artifact_id, user_id)
    }

    fn count(&self, user_id: &UserId) -> Result<usize, StorageError> {
        self.inner.count(user_id)
    }
}

/// An orchestrator over in-memory stores plus handles to inspect them.
pub struct Harness {
    pub service: Arc<ScriptedService>,
    pub leases: Arc<MemoryLeaseStore>,
    pub quota_store: Arc<MemoryQuotaStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub orchestrator: GenerationOrchestrator,
}

/// Admission over `leases` with millisecond backoff and the given wait timeout.
pub fn fast_admission(
    leases: Arc<dyn LeaseStore>,
    capacity: usize,
    wait_timeout: Duration,
) -> AdmissionController {
    let config = AdmissionConfig {
        capacity,
        ..AdmissionConfig::default()
    };
    AdmissionController::new(leases, &config)
        .with_wait_timeout(wait_timeout)
        .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
}

pub fn harness(service: ScriptedService, capacity: usize) -> Harness {
    harness_with(
        service,
        capacity,
        Duration::from_secs(2),
        Arc::new(MemoryArtifactStore::new(10)),
    )
}

pub fn harness_with(
    service: ScriptedService,
    capacity: usize,
    wait_timeout: Duration,
    artifacts: Arc<dyn ArtifactStore>,
) -> Harness {
    let service = Arc::new(service);
    let leases = Arc::new(MemoryLeaseStore::new());
    let quota_store = Arc::new(MemoryQuotaStore::new());
    let orchestrator = GenerationOrchestrator::new(
        service.clone(),
        fast_admission(leases.clone(), capacity, wait_timeout),
        QuotaGate::new(quota_store.clone()),
        artifacts.clone(),
        GenerationOptions::default(),
    );
    Harness {
        service,
        leases,
        quota_store,
        artifacts,
        orchestrator,
    }
}

impl Harness {
    pub fn grant(&self, user: &str, credits: u32) {
        self.quota_store
            .set_remaining(&UserId::new(user), credits)
            .unwrap();
    }

    pub fn remaining(&self, user: &str) -> u32 {
        self.quota_store
            .get_remaining(&UserId::new(user))
            .unwrap()
            .unwrap_or(0)
    }

    pub fn outstanding_leases(&self) -> usize {
        self.leases.outstanding().unwrap()
    }
}

pub fn job(user: &str, name: &str, documents: usize, total_items: u32) -> JobRequest {
    JobRequest {
        user_id: UserId::new(user),
        name: name.to_string(),
        document_refs: (0..documents)
            .map(|i| RemoteRef::new(format!("files/doc-{}.pdf", i), "application/pdf"))
            .collect(),
        spec: ExamSpec {
            title: "Cell Biology".to_string(),
            total_items,
            custom_instructions: None,
            style_sample: None,
        },
    }
}
