use std::future::Future;

use super::{seed_deployed, seed_requested, TestResult};
use crate::{CorrelationId, LedgerStorage, ResourceState, StorageError};

pub(super) async fn run_transition_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "transition",
            "mark_deployed_sets_flag_and_external_id",
            mark_deployed_sets_flag_and_external_id(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "mark_deployed_same_external_id_is_noop",
            mark_deployed_same_external_id_is_noop(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "mark_deployed_different_external_id_rejected",
            mark_deployed_different_external_id_rejected(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "mark_deployed_empty_external_id_rejected",
            mark_deployed_empty_external_id_rejected(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "failed_deployment_is_terminal",
            failed_deployment_is_terminal(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "failed_deployment_of_deployed_record_rejected",
            failed_deployment_of_deployed_record_rejected(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "deletion_request_keeps_first_timestamp",
            deletion_request_keeps_first_timestamp(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "deletion_request_on_undeployed_rejected",
            deletion_request_on_undeployed_rejected(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "clear_deletion_request_returns_to_deployed",
            clear_deletion_request_returns_to_deployed(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "double_soft_delete_returns_already_deleted",
            double_soft_delete_returns_already_deleted(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "mutating_missing_record_returns_not_found",
            mutating_missing_record_returns_not_found(factory).await,
        ),
    ]
}

/// Run `mark_deployed` in its own snapshot, committing only on success.
async fn try_deploy<S: LedgerStorage>(
    s: &S,
    id: CorrelationId,
    external_id: &str,
) -> Result<Result<(), StorageError>, String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.mark_deployed(&mut snap, id, external_id).await;
    if result.is_ok() {
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    } else {
        s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    }
    Ok(result)
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn mark_deployed_sets_flag_and_external_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    try_deploy(&s, id, "ext-123")
        .await?
        .map_err(|e| e.to_string())?;
    let rec = s.find_record(id).await.map_err(|e| e.to_string())?;
    if !rec.deployed || rec.external_id != "ext-123" {
        return Err(format!("unexpected record after deploy: {:?}", rec));
    }
    if rec.state() != ResourceState::Deployed {
        return Err(format!("expected deployed, got {}", rec.state()));
    }
    Ok(())
}

async fn mark_deployed_same_external_id_is_noop<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    try_deploy(&s, id, "ext-1").await?.map_err(|e| e.to_string())?;
    let before = s.find_record(id).await.map_err(|e| e.to_string())?;
    try_deploy(&s, id, "ext-1").await?.map_err(|e| e.to_string())?;
    let after = s.find_record(id).await.map_err(|e| e.to_string())?;
    if before != after {
        return Err(format!("record changed: {:?} -> {:?}", before, after));
    }
    Ok(())
}

async fn mark_deployed_different_external_id_rejected<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    try_deploy(&s, id, "ext-1").await?.map_err(|e| e.to_string())?;
    match try_deploy(&s, id, "ext-2").await? {
        Err(StorageError::InvalidTransition { .. }) => {}
        other => return Err(format!("expected InvalidTransition, got {:?}", other)),
    }
    let rec = s.find_record(id).await.map_err(|e| e.to_string())?;
    if rec.external_id != "ext-1" {
        return Err(format!("external id overwritten: {}", rec.external_id));
    }
    Ok(())
}

async fn mark_deployed_empty_external_id_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    match try_deploy(&s, id, "").await? {
        Err(StorageError::InvalidTransition { .. }) => Ok(()),
        other => Err(format!("expected InvalidTransition, got {:?}", other)),
    }
}

/// After a failed deployment the record is tombstoned and cannot be deployed.
async fn failed_deployment_is_terminal<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.mark_deployment_failed(&mut snap, id)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.find_record(id).await.map_err(|e| e.to_string())?;
    if rec.state() != ResourceState::Rejected {
        return Err(format!("expected rejected, got {}", rec.state()));
    }
    match try_deploy(&s, id, "ext-late").await? {
        Err(StorageError::AlreadyDeleted { .. }) => Ok(()),
        other => Err(format!("expected AlreadyDeleted, got {:?}", other)),
    }
}

async fn failed_deployment_of_deployed_record_rejected<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_deployed(&s, "alice").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.mark_deployment_failed(&mut snap, id).await;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    match result {
        Err(StorageError::InvalidTransition { .. }) => Ok(()),
        other => Err(format!("expected InvalidTransition, got {:?}", other)),
    }
}

async fn deletion_request_keeps_first_timestamp<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_deployed(&s, "alice").await?;
    for at in ["2025-02-01T00:00:00Z", "2025-03-01T00:00:00Z"] {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.mark_deletion_requested(&mut snap, id, at)
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }
    let rec = s.find_record(id).await.map_err(|e| e.to_string())?;
    if rec.deletion_requested_at.as_deref() != Some("2025-02-01T00:00:00Z") {
        return Err(format!(
            "expected first timestamp, got {:?}",
            rec.deletion_requested_at
        ));
    }
    if rec.state() != ResourceState::DeletionRequested || rec.deleted {
        return Err(format!("unexpected state {}", rec.state()));
    }
    Ok(())
}

async fn deletion_request_on_undeployed_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .mark_deletion_requested(&mut snap, id, "2025-02-01T00:00:00Z")
        .await;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    match result {
        Err(StorageError::InvalidTransition { .. }) => Ok(()),
        other => Err(format!("expected InvalidTransition, got {:?}", other)),
    }
}

async fn clear_deletion_request_returns_to_deployed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_deployed(&s, "alice").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.mark_deletion_requested(&mut snap, id, "2025-02-01T00:00:00Z")
        .await
        .map_err(|e| e.to_string())?;
    s.clear_deletion_request(&mut snap, id)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.find_record(id).await.map_err(|e| e.to_string())?;
    if rec.state() != ResourceState::Deployed {
        return Err(format!("expected deployed, got {}", rec.state()));
    }
    Ok(())
}

async fn double_soft_delete_returns_already_deleted<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_deployed(&s, "alice").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.soft_delete(&mut snap, id)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.soft_delete(&mut snap, id).await;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    match result {
        Err(StorageError::AlreadyDeleted { correlation_id }) if correlation_id == id => Ok(()),
        other => Err(format!("expected AlreadyDeleted, got {:?}", other)),
    }
}

async fn mutating_missing_record_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let missing = CorrelationId(7);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let results = [
        s.mark_deployed(&mut snap, missing, "ext").await,
        s.mark_deployment_failed(&mut snap, missing).await,
        s.soft_delete(&mut snap, missing).await,
    ];
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    for r in results {
        if !matches!(r, Err(StorageError::RecordNotFound { .. })) {
            return Err(format!("expected RecordNotFound, got {:?}", r));
        }
    }
    Ok(())
}
