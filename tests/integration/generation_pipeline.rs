//! End-to-end generation jobs over in-memory stores and a scripted service

use super::test_utils::{harness, harness_with, job, FlakyArtifactStore, ScriptedService};
use examgen::admission::LeaseStore;
use examgen::error::{
    CapacityError, GenerationError, ProviderError, UpstreamErrorKind, ValidationFailure,
};
use examgen::orchestrator::JobStats;
use examgen::types::{JobId, UserId};
use examgen::upload::{SourceDocument, UploadConfig, UploadTracker};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_successful_job_consumes_credit_and_saves_artifact() {
    let h = harness(ScriptedService::new(), 2);
    h.grant("ada", 1);

    let outcome = h
        .orchestrator
        .run(job("ada", "Midterm", 1, 30), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.remaining("ada"), 0);
    assert!(outcome.quota_consumed);
    assert_eq!(h.outstanding_leases(), 0);
    assert_eq!(outcome.content, ScriptedService::DEFAULT_EXAM);
    assert_eq!(outcome.time_budget_minutes, 50);

    let saved = h.artifacts.list_by_user(&UserId::new("ada")).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].name, "Midterm");
    let artifact = h.artifacts.get(&outcome.artifact_id, &UserId::new("ada")).unwrap();
    assert_eq!(artifact.metadata.provider, "scripted");
    assert_eq!(artifact.metadata.breakdown.multiple_choice, 15);
    assert_eq!(artifact.metadata.source_documents, vec!["files/doc-0.pdf"]);

    assert_eq!(
        h.orchestrator.stats(),
        JobStats {
            in_flight: 0,
            completed: 1,
            failed: 0
        }
    );
}

#[tokio::test]
async fn test_exhausted_quota_fails_before_any_lease_or_call() {
    let h = harness(ScriptedService::new(), 2);
    h.grant("bo", 0);

    let err = h
        .orchestrator
        .run(job("bo", "Quiz", 1, 10), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::QuotaExhausted { .. }));
    assert!(!err.is_retryable());
    assert_eq!(h.service.calls(), 0);
    assert_eq!(h.outstanding_leases(), 0);
    assert_eq!(h.orchestrator.stats().failed, 1);
}

#[tokio::test]
async fn test_unknown_user_has_no_credits() {
    let h = harness(ScriptedService::new(), 1);
    let err = h
        .orchestrator
        .run(job("stranger", "Quiz", 1, 10), CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "QUOTA_EXHAUSTED");
}

#[tokio::test]
async fn test_admission_timeout_consumes_no_credit() {
    let h = harness_with(
        ScriptedService::new(),
        1,
        Duration::from_millis(80),
        Arc::new(examgen::artifact::MemoryArtifactStore::new(10)),
    );
    h.grant("cy", 3);
    let held = h
        .leases
        .try_acquire(JobId::new(), 1, Duration::from_secs(60))
        .unwrap()
        .unwrap();

    let err = h
        .orchestrator
        .run(job("cy", "Quiz", 1, 10), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GenerationError::Capacity(CapacityError::AdmissionTimeout { .. })
    ));
    assert!(err.is_retryable());
    assert_eq!(h.remaining("cy"), 3);
    assert_eq!(h.service.calls(), 0);

    h.leases.release(&held.lease_id).unwrap();
    assert_eq!(h.outstanding_leases(), 0);
}

#[tokio::test]
async fn test_tertiary_response_shape_yields_same_text() {
    let h = harness(
        ScriptedService::new()
            .respond_with(json!({ "text": ScriptedService::DEFAULT_EXAM }))
            .respond_with(json!({
                "choices": [ { "message": { "content": ScriptedService::DEFAULT_EXAM } } ]
            })),
        1,
    );
    h.grant("di", 2);

    let primary = h
        .orchestrator
        .run(job("di", "First", 1, 8), CancellationToken::new())
        .await
        .unwrap();
    let tertiary = h
        .orchestrator
        .run(job("di", "Second", 1, 8), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(primary.content, tertiary.content);
    assert_eq!(h.remaining("di"), 0);
}

#[tokio::test]
async fn test_persistence_failure_keeps_output_for_retry() {
    let store = Arc::new(FlakyArtifactStore::new(1));
    let h = harness_with(ScriptedService::new(), 1, Duration::from_secs(1), store);
    h.grant("ed", 2);

    let err = h
        .orchestrator
        .run(job("ed", "Final", 1, 20), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "PERSISTENCE_ERROR");
    assert!(!err.is_retryable());
    assert_eq!(h.remaining("ed"), 1);
    assert_eq!(h.outstanding_leases(), 0);

    let pending = err.pending_artifact().unwrap().clone();
    assert_eq!(pending.content, ScriptedService::DEFAULT_EXAM);
    let id = h.orchestrator.retry_save(&pending).unwrap();
    assert_eq!(h.artifacts.get(&id, &UserId::new("ed")).unwrap().name, "Final");
    assert_eq!(h.service.calls(), 1);
    assert_eq!(h.remaining("ed"), 1);
}

#[tokio::test]
async fn test_artifact_cap_surfaces_as_persistence_error() {
    let store = Arc::new(examgen::artifact::MemoryArtifactStore::new(1));
    let h = harness_with(ScriptedService::new(), 1, Duration::from_secs(1), store);
    h.grant("fay", 5);

    h.orchestrator
        .run(job("fay", "One", 1, 5), CancellationToken::new())
        .await
        .unwrap();
    let err = h
        .orchestrator
        .run(job("fay", "Two", 1, 5), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        GenerationError::Persistence { source, .. } => {
            assert!(matches!(
                source,
                examgen::error::StorageError::LimitReached { limit: 1 }
            ));
        }
        other => panic!("expected persistence error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_validation_failures_never_reach_the_service() {
    let h = harness(ScriptedService::new(), 1);
    h.grant("gus", 5);

    let blank = h
        .orchestrator
        .run(job("gus", "   ", 1, 10), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        blank,
        GenerationError::Validation(ValidationFailure::MissingName)
    ));

    let no_docs = h
        .orchestrator
        .run(job("gus", "Quiz", 0, 10), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        no_docs,
        GenerationError::Validation(ValidationFailure::NoReadyDocuments)
    ));

    assert_eq!(h.service.calls(), 0);
    assert_eq!(h.remaining("gus"), 5);
}

#[tokio::test]
async fn test_upstream_errors_keep_their_kind_and_release_the_lease() {
    let h = harness(
        ScriptedService::new()
            .fail_with(ProviderError::upstream(
                UpstreamErrorKind::RateLimited,
                "slow down",
            ))
            .respond_with(json!({ "prompt_feedback": { "block_reason": "SAFETY" } }))
            .respond_with(json!({ "candidates": [] })),
        1,
    );
    h.grant("hal", 3);

    let rate_limited = h
        .orchestrator
        .run(job("hal", "A", 1, 10), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        rate_limited,
        GenerationError::Upstream {
            kind: UpstreamErrorKind::RateLimited,
            ..
        }
    ));
    assert!(rate_limited.is_retryable());

    let blocked = h
        .orchestrator
        .run(job("hal", "B", 1, 10), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        blocked,
        GenerationError::Upstream {
            kind: UpstreamErrorKind::SafetyBlocked(_),
            ..
        }
    ));

    let empty = h
        .orchestrator
        .run(job("hal", "C", 1, 10), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(empty, GenerationError::EmptyResponse));

    assert_eq!(h.remaining("hal"), 3);
    assert_eq!(h.outstanding_leases(), 0);
    assert_eq!(h.orchestrator.stats().failed, 3);
}

#[tokio::test]
async fn test_code_fence_is_stripped_before_saving() {
    let h = harness(
        ScriptedService::new().respond_with(json!({
            "text": "```markdown\n# Fenced Exam\n1. Question\n```"
        })),
        1,
    );
    h.grant("ivy", 1);

    let outcome = h
        .orchestrator
        .run(job("ivy", "Fenced", 1, 4), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.content, "# Fenced Exam\n1. Question");
}

#[tokio::test]
async fn test_cancellation_during_call_releases_lease_and_keeps_credit() {
    let h = harness(
        ScriptedService::new().with_generate_delay(Duration::from_secs(5)),
        1,
    );
    h.grant("jo", 1);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = h
        .orchestrator
        .run(job("jo", "Quiz", 1, 10), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Cancelled));
    assert_eq!(h.remaining("jo"), 1);
    assert_eq!(h.outstanding_leases(), 0);
    assert_eq!(h.service.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_never_exceed_capacity() {
    let h = Arc::new(harness(
        ScriptedService::new().with_generate_delay(Duration::from_millis(40)),
        2,
    ));
    for user in ["u0", "u1", "u2", "u3", "u4", "u5"] {
        h.grant(user, 1);
    }

    let mut handles = Vec::new();
    for user in ["u0", "u1", "u2", "u3", "u4", "u5"] {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.orchestrator
                .run(job(user, "Quiz", 1, 10), CancellationToken::new())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(h.service.max_in_flight.load(std::sync::atomic::Ordering::SeqCst) <= 2);
    assert_eq!(h.service.calls(), 6);
    assert_eq!(h.outstanding_leases(), 0);
    assert_eq!(h.orchestrator.stats().completed, 6);
}

#[tokio::test]
async fn test_run_with_tracker_uses_ready_documents_and_clears() {
    let h = harness(ScriptedService::new(), 1);
    h.grant("kim", 1);
    let tracker = UploadTracker::new(h.service.clone(), &UploadConfig { max_files: 3 });
    tracker
        .submit(vec![
            SourceDocument::new("notes.pdf", b"%PDF".to_vec()),
            SourceDocument::new("slides.key", b"keynote".to_vec()),
        ])
        .await;

    let outcome = h
        .orchestrator
        .run_with_tracker(
            &tracker,
            UserId::new("kim"),
            "Unit 1",
            job("kim", "Unit 1", 0, 12).spec,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let request = h.service.last_request.lock().clone().unwrap();
    assert_eq!(request.document_refs.len(), 1);
    assert_eq!(request.document_refs[0].uri, "files/notes.pdf");
    assert_eq!(outcome.breakdown.total(), 12);
    assert!(tracker.items().is_empty());
}

#[tokio::test]
async fn test_blank_shapes_fall_through_to_the_next_one() {
    let h = harness(
        ScriptedService::new()
            .respond_with(json!({
                "text": "",
                "candidates": [ { "content": { "parts": [ { "text": ScriptedService::DEFAULT_EXAM } ] } } ]
            }))
            .respond_with(json!({
                "candidates": [],
                "choices": [ { "message": { "content": ScriptedService::DEFAULT_EXAM } } ]
            })),
        1,
    );
    h.grant("lu", 2);

    for name in ["First", "Second"] {
        let outcome = h
            .orchestrator
            .run(job("lu", name, 1, 8), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.content, ScriptedService::DEFAULT_EXAM);
    }
    assert_eq!(h.remaining("lu"), 0);
}

#[tokio::test]
async fn test_dropped_run_future_leaves_no_job_in_flight() {
    let h = harness(
        ScriptedService::new().with_generate_delay(Duration::from_secs(5)),
        1,
    );
    h.grant("max", 1);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.orchestrator
            .run(job("max", "Quiz", 1, 10), CancellationToken::new()),
    )
    .await;

    assert!(abandoned.is_err());
    assert_eq!(h.orchestrator.stats().in_flight, 0);
    assert_eq!(h.outstanding_leases(), 0);
    assert_eq!(h.remaining("max"), 1);
}
