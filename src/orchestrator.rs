//! Generation Orchestrator
//!
//! Runs one exam generation job end to end:
//! validate → quota check → admission lease → assemble → generate → extract →
//! strip fence → consume credit → persist → release lease.
//!
//! The lease is held by a [`LeaseGuard`](crate::admission::LeaseGuard), so every exit path
//! after acquisition gives the slot back. Quota is checked before the lease is requested
//! and consumed only after the service returned usable text.

use crate::admission::AdmissionController;
use crate::artifact::{ArtifactMetadata, ArtifactStore, PendingArtifact};
use crate::assembler::{ExamSpec, ItemBreakdown, RequestAssembler, MAX_TOTAL_ITEMS};
use crate::error::{GenerationError, UpstreamErrorKind, ValidationFailure};
use crate::provider::{strip_code_fence, Extracted, GenerationOptions, GenerationService};
use crate::quota::QuotaGate;
use crate::types::{ArtifactId, JobId, RemoteRef, UserId};
use crate::upload::UploadTracker;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One generation job
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub user_id: UserId,
    pub name: String,
    pub document_refs: Vec<RemoteRef>,
    pub spec: ExamSpec,
}

/// Result of a successful job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub artifact_id: ArtifactId,
    pub content: String,
    pub breakdown: ItemBreakdown,
    pub time_budget_minutes: u32,
    /// False when a concurrent job for the same user took the last credit first
    pub quota_consumed: bool,
    pub duration: Duration,
}

/// Counters across all jobs run by one orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
}

pub struct GenerationOrchestrator {
    service: Arc<dyn GenerationService>,
    admission: AdmissionController,
    quota: QuotaGate,
    artifacts: Arc<dyn ArtifactStore>,
    options: GenerationOptions,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl GenerationOrchestrator {
    pub fn new(
        service: Arc<dyn GenerationService>,
        admission: AdmissionController,
        quota: QuotaGate,
        artifacts: Arc<dyn ArtifactStore>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            service,
            admission,
            quota,
            artifacts,
            options,
            in_flight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    /// Run a job. Cancelling `cancel` aborts the admission wait or the service call.
    pub async fn run(
        &self,
        job: JobRequest,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, GenerationError> {
        let job_id = JobId::new();
        let started = Instant::now();
        let in_flight = InFlight::enter(&self.in_flight);

        let result = self.execute(job_id, &job, &cancel).await;

        drop(in_flight);
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                info!(
                    job_id = %job_id,
                    user_id = %job.user_id,
                    artifact_id = %outcome.artifact_id,
                    duration_ms,
                    "Generation job completed"
                );
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    job_id = %job_id,
                    user_id = %job.user_id,
                    code = e.error_code(),
                    error = %e,
                    duration_ms,
                    "Generation job failed"
                );
            }
        }
        result
    }

    async fn execute(
        &self,
        job_id: JobId,
        job: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, GenerationError> {
        let started = Instant::now();
        validate(job)?;
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let remaining = self
            .quota
            .check_available(&job.user_id)
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;
        if remaining == 0 {
            return Err(GenerationError::QuotaExhausted {
                user_id: job.user_id.clone(),
            });
        }

        let lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            acquired = self.admission.acquire(job_id) => acquired?,
        };
        info!(
            job_id = %job_id,
            user_id = %job.user_id,
            lease_id = %lease.lease().lease_id,
            documents = job.document_refs.len(),
            "Generation job admitted"
        );

        let request = RequestAssembler::assemble(&job.document_refs, &job.spec);

        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            response = self.service.generate(&request, &self.options) => response?,
        };

        let content = match envelope.extract() {
            Extracted::Text(text) => strip_code_fence(&text),
            Extracted::Blocked(kind) => {
                let message = match &kind {
                    UpstreamErrorKind::SafetyBlocked(reason) => {
                        format!("Request blocked by the service: {}", reason)
                    }
                    _ => "Request blocked by the service".to_string(),
                };
                return Err(GenerationError::Upstream { kind, message });
            }
            Extracted::Empty => {
                warn!(job_id = %job_id, shape = %envelope.shape(), "Response carried no text");
                return Err(GenerationError::EmptyResponse);
            }
        };
        if content.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        // The output already exists; a failed decrement must not discard it.
        let quota_consumed = match self.quota.consume(&job.user_id) {
            Ok(consumed) => consumed,
            Err(e) => {
                error!(job_id = %job_id, user_id = %job.user_id, error = %e, "Quota consume failed");
                false
            }
        };

        let pending = PendingArtifact {
            user_id: job.user_id.clone(),
            name: job.name.trim().to_string(),
            content,
            metadata: ArtifactMetadata {
                title: job.spec.title.trim().to_string(),
                breakdown: request.breakdown,
                time_budget_minutes: request.time_budget_minutes,
                template: request.template,
                provider: self.service.provider_name().to_string(),
                model: self.options.model.clone(),
                source_documents: job.document_refs.iter().map(|r| r.uri.clone()).collect(),
            },
        };
        let artifact_id = self.persist(pending.clone())?;

        if let Err(e) = lease.release() {
            warn!(job_id = %job_id, error = %e, "Lease release failed; it will expire");
        }

        Ok(JobOutcome {
            job_id,
            artifact_id,
            content: pending.content,
            breakdown: request.breakdown,
            time_budget_minutes: request.time_budget_minutes,
            quota_consumed,
            duration: started.elapsed(),
        })
    }

    fn persist(&self, pending: PendingArtifact) -> Result<ArtifactId, GenerationError> {
        match self.artifacts.insert(
            &pending.user_id,
            &pending.name,
            &pending.content,
            &pending.metadata,
        ) {
            Ok(id) => Ok(id),
            Err(source) => Err(GenerationError::Persistence {
                pending: Box::new(pending),
                source,
            }),
        }
    }

    /// Save output from a job that failed with `Persistence`, without regenerating.
    pub fn retry_save(&self, pending: &PendingArtifact) -> Result<ArtifactId, GenerationError> {
        let id = self.persist(pending.clone())?;
        info!(user_id = %pending.user_id, artifact_id = %id, "Pending artifact saved");
        Ok(id)
    }

    /// Run a job over the tracker's ready documents and clear the working set on success.
    pub async fn run_with_tracker(
        &self,
        tracker: &UploadTracker,
        user_id: UserId,
        name: impl Into<String>,
        spec: ExamSpec,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, GenerationError> {
        let job = JobRequest {
            user_id,
            name: name.into(),
            document_refs: tracker.ready_documents(),
            spec,
        };
        let outcome = self.run(job, cancel).await?;
        tracker.clear();
        Ok(outcome)
    }
}

/// Counts one running job; leaves on drop, including when the `run` future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn validate(job: &JobRequest) -> Result<(), ValidationFailure> {
    if job.name.trim().is_empty() {
        return Err(ValidationFailure::MissingName);
    }
    if job.document_refs.is_empty() {
        return Err(ValidationFailure::NoReadyDocuments);
    }
    if job.spec.total_items == 0 || job.spec.total_items > MAX_TOTAL_ITEMS {
        return Err(ValidationFailure::InvalidItemCount {
            requested: job.spec.total_items,
            max: MAX_TOTAL_ITEMS,
        });
    }
    Ok(())
}
