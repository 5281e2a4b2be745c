use std::future::Future;

use super::{indexed_ids, make_record, seed_deployed, T0, TestResult};
use crate::{CorrelationId, Identity, LedgerStorage, ResourceState, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "aborted_insert_leaves_no_record_or_index",
            aborted_insert_leaves_no_record_or_index(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "dropped_snapshot_rolls_back",
            dropped_snapshot_rolls_back(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "aborted_allocation_is_not_consumed",
            aborted_allocation_is_not_consumed(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "aborted_soft_delete_restores_index",
            aborted_soft_delete_restores_index(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "commit_applies_all_mutations",
            commit_applies_all_mutations(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn aborted_insert_leaves_no_record_or_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let id = s
        .allocate_correlation_id(&mut snap)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_record(&mut snap, make_record(id, "alice"))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match s.find_record(id).await {
        Err(StorageError::RecordNotFound { .. }) => {}
        other => return Err(format!("expected RecordNotFound, got {:?}", other)),
    }
    let ids = indexed_ids(&s, "alice").await?;
    if !ids.is_empty() {
        return Err(format!("index not rolled back: {:?}", ids));
    }
    Ok(())
}

async fn dropped_snapshot_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let alice = Identity::from("alice");
    {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.set_registered(&mut snap, &alice, true)
            .await
            .map_err(|e| e.to_string())?;
        s.append_event(&mut snap, "Probe", serde_json::json!({}), T0)
            .await
            .map_err(|e| e.to_string())?;
    }
    if s.is_registered(&alice).await.map_err(|e| e.to_string())? {
        return Err("registration survived a dropped snapshot".to_string());
    }
    let events = s.list_events(0, 0).await.map_err(|e| e.to_string())?;
    if !events.is_empty() {
        return Err(format!("journal survived a dropped snapshot: {:?}", events));
    }
    Ok(())
}

/// An id allocated in an aborted snapshot was never paired with a record,
/// so the next allocation may reuse it.
async fn aborted_allocation_is_not_consumed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let first = s
        .allocate_correlation_id(&mut snap)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let second = s
        .allocate_correlation_id(&mut snap)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if first != second {
        return Err(format!("expected {} to be reissued, got {}", first, second));
    }
    Ok(())
}

async fn aborted_soft_delete_restores_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(seed_deployed(&s, "alice").await?.get());
    }
    let before = indexed_ids(&s, "alice").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.soft_delete(&mut snap, CorrelationId(ids[0]))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let after = indexed_ids(&s, "alice").await?;
    if before != after {
        return Err(format!("index changed: {:?} -> {:?}", before, after));
    }
    let rec = s
        .find_record(CorrelationId(ids[0]))
        .await
        .map_err(|e| e.to_string())?;
    if rec.state() != ResourceState::Deployed {
        return Err(format!("expected deployed, got {}", rec.state()));
    }
    Ok(())
}

async fn commit_applies_all_mutations<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let alice = Identity::from("alice");
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.set_registered(&mut snap, &alice, true)
        .await
        .map_err(|e| e.to_string())?;
    let id = s
        .allocate_correlation_id(&mut snap)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_record(&mut snap, make_record(id, "alice"))
        .await
        .map_err(|e| e.to_string())?;
    s.append_event(&mut snap, "DeployRequested", serde_json::json!({"id": 1}), T0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if !s.is_registered(&alice).await.map_err(|e| e.to_string())? {
        return Err("registration missing after commit".to_string());
    }
    s.find_record(id).await.map_err(|e| e.to_string())?;
    let events = s.list_events(0, 0).await.map_err(|e| e.to_string())?;
    if events.len() != 1 {
        return Err(format!("expected 1 event, got {}", events.len()));
    }
    Ok(())
}
