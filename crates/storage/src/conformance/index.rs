use std::future::Future;

use super::{indexed_ids, seed_deployed, seed_requested, TestResult};
use crate::{Identity, LedgerStorage};

pub(super) async fn run_index_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "index",
            "inserted_record_appears_in_owner_index",
            inserted_record_appears_in_owner_index(factory).await,
        ),
        TestResult::from_result(
            "index",
            "owners_have_independent_indexes",
            owners_have_independent_indexes(factory).await,
        ),
        TestResult::from_result(
            "index",
            "unknown_owner_has_empty_index",
            unknown_owner_has_empty_index(factory).await,
        ),
        TestResult::from_result(
            "index",
            "soft_delete_swap_removes_only_target",
            soft_delete_swap_removes_only_target(factory).await,
        ),
        TestResult::from_result(
            "index",
            "failed_deployment_leaves_index",
            failed_deployment_leaves_index(factory).await,
        ),
        TestResult::from_result(
            "index",
            "repeated_deploy_does_not_duplicate_entry",
            repeated_deploy_does_not_duplicate_entry(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn inserted_record_appears_in_owner_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_requested(&s, "alice").await?;
    let ids = indexed_ids(&s, "alice").await?;
    if ids != vec![id.get()] {
        return Err(format!("expected index [{}], got {:?}", id, ids));
    }
    Ok(())
}

async fn owners_have_independent_indexes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a1 = seed_requested(&s, "alice").await?;
    let b1 = seed_requested(&s, "bob").await?;
    let a2 = seed_requested(&s, "alice").await?;

    let alice = indexed_ids(&s, "alice").await?;
    let bob = indexed_ids(&s, "bob").await?;
    if alice != vec![a1.get(), a2.get()] {
        return Err(format!("alice index wrong: {:?}", alice));
    }
    if bob != vec![b1.get()] {
        return Err(format!("bob index wrong: {:?}", bob));
    }
    Ok(())
}

async fn unknown_owner_has_empty_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_requested(&s, "alice").await?;
    let records = s
        .list_by_owner(&Identity::from("nobody"))
        .await
        .map_err(|e| e.to_string())?;
    if !records.is_empty() {
        return Err(format!("expected empty index, got {} records", records.len()));
    }
    Ok(())
}

/// Deleting a middle entry removes exactly that entry; order is not checked.
async fn soft_delete_swap_removes_only_target<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(seed_deployed(&s, "alice").await?);
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.soft_delete(&mut snap, ids[1])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let remaining = indexed_ids(&s, "alice").await?;
    let expected: Vec<u64> = [ids[0], ids[2], ids[3]].iter().map(|i| i.get()).collect();
    if remaining != expected {
        return Err(format!("expected {:?}, got {:?}", expected, remaining));
    }

    // The canonical store still resolves the tombstoned id.
    let rec = s.find_record(ids[1]).await.map_err(|e| e.to_string())?;
    if !rec.deleted {
        return Err("soft-deleted record must carry the deleted flag".to_string());
    }
    Ok(())
}

async fn failed_deployment_leaves_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let keep = seed_requested(&s, "alice").await?;
    let failed = seed_requested(&s, "alice").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.mark_deployment_failed(&mut snap, failed)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let remaining = indexed_ids(&s, "alice").await?;
    if remaining != vec![keep.get()] {
        return Err(format!("expected [{}], got {:?}", keep, remaining));
    }
    Ok(())
}

async fn repeated_deploy_does_not_duplicate_entry<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_deployed(&s, "alice").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.mark_deployed(&mut snap, id, &format!("ext-{}", id))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let ids = indexed_ids(&s, "alice").await?;
    if ids != vec![id.get()] {
        return Err(format!("expected a single entry, got {:?}", ids));
    }
    Ok(())
}
