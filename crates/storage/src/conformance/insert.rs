use std::future::Future;

use super::{make_record, seed_requested, TestResult};
use crate::{CorrelationId, LedgerStorage, ResourceState, StorageError};

pub(super) async fn run_insert_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "insert",
            "allocated_ids_start_at_one",
            allocated_ids_start_at_one(factory).await,
        ),
        TestResult::from_result(
            "insert",
            "allocated_ids_strictly_increase",
            allocated_ids_strictly_increase(factory).await,
        ),
        TestResult::from_result(
            "insert",
            "inserted_record_readable_via_find_record",
            inserted_record_readable_via_find_record(factory).await,
        ),
        TestResult::from_result(
            "insert",
            "inserted_record_readable_for_update",
            inserted_record_readable_for_update(factory).await,
        ),
        TestResult::from_result(
            "insert",
            "duplicate_insert_returns_duplicate_id",
            duplicate_insert_returns_duplicate_id(factory).await,
        ),
        TestResult::from_result(
            "insert",
            "find_missing_returns_record_not_found",
            find_missing_returns_record_not_found(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

/// The first allocated correlation id is 1; zero is never issued.
async fn allocated_ids_start_at_one<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    if id != CorrelationId(1) {
        return Err(format!("expected first id 1, got {}", id));
    }
    Ok(())
}

/// Ids keep increasing across owners and snapshots.
async fn allocated_ids_strictly_increase<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut last = 0;
    for owner in ["alice", "bob", "alice", "carol", "bob"] {
        let id = seed_requested(&s, owner).await?.get();
        if id <= last {
            return Err(format!("id {} not greater than previous {}", id, last));
        }
        last = id;
    }
    Ok(())
}

async fn inserted_record_readable_via_find_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    let rec = s.find_record(id).await.map_err(|e| e.to_string())?;
    if rec.owner.as_str() != "alice" || rec.template_id != "tpl-test" {
        return Err(format!("unexpected record contents: {:?}", rec));
    }
    if rec.state() != ResourceState::Requested {
        return Err(format!("expected requested state, got {}", rec.state()));
    }
    if !rec.external_id.is_empty() {
        return Err("external id must be empty before deployment".to_string());
    }
    Ok(())
}

async fn inserted_record_readable_for_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let rec = s
        .get_record_for_update(&mut snap, id)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if rec.correlation_id != id {
        return Err(format!("expected id {}, got {}", id, rec.correlation_id));
    }
    Ok(())
}

/// Inserting the same correlation id twice returns DuplicateId.
async fn duplicate_insert_returns_duplicate_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.insert_record(&mut snap, make_record(id, "bob")).await;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    match result {
        Err(StorageError::DuplicateId { correlation_id }) if correlation_id == id => Ok(()),
        other => Err(format!("expected DuplicateId, got {:?}", other)),
    }
}

async fn find_missing_returns_record_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.find_record(CorrelationId(42)).await {
        Err(StorageError::RecordNotFound { correlation_id }) if correlation_id.get() == 42 => {
            Ok(())
        }
        other => Err(format!("expected RecordNotFound, got {:?}", other)),
    }
}
