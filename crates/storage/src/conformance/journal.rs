use std::future::Future;

use super::{T0, TestResult};
use crate::LedgerStorage;

pub(super) async fn run_journal_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "journal",
            "sequences_are_gap_free_from_one",
            sequences_are_gap_free_from_one(factory).await,
        ),
        TestResult::from_result(
            "journal",
            "list_events_filters_by_position",
            list_events_filters_by_position(factory).await,
        ),
        TestResult::from_result(
            "journal",
            "list_events_respects_limit",
            list_events_respects_limit(factory).await,
        ),
        TestResult::from_result(
            "journal",
            "payload_round_trips",
            payload_round_trips(factory).await,
        ),
    ]
}

async fn append_n<S: LedgerStorage>(s: &S, n: usize) -> Result<(), String> {
    for i in 0..n {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.append_event(&mut snap, "Probe", serde_json::json!({ "i": i }), T0)
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }
    Ok(())
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn sequences_are_gap_free_from_one<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    append_n(&s, 2).await?;

    // An aborted append must not leave a hole.
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.append_event(&mut snap, "Probe", serde_json::json!({}), T0)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    append_n(&s, 1).await?;
    let seqs: Vec<u64> = s
        .list_events(0, 0)
        .await
        .map_err(|e| e.to_string())?
        .iter()
        .map(|e| e.sequence)
        .collect();
    if seqs != vec![1, 2, 3] {
        return Err(format!("expected [1, 2, 3], got {:?}", seqs));
    }
    Ok(())
}

async fn list_events_filters_by_position<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    append_n(&s, 5).await?;
    let seqs: Vec<u64> = s
        .list_events(3, 0)
        .await
        .map_err(|e| e.to_string())?
        .iter()
        .map(|e| e.sequence)
        .collect();
    if seqs != vec![4, 5] {
        return Err(format!("expected [4, 5], got {:?}", seqs));
    }
    Ok(())
}

async fn list_events_respects_limit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    append_n(&s, 5).await?;
    let events = s.list_events(1, 2).await.map_err(|e| e.to_string())?;
    let seqs: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    if seqs != vec![2, 3] {
        return Err(format!("expected [2, 3], got {:?}", seqs));
    }
    Ok(())
}

async fn payload_round_trips<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let payload = serde_json::json!({"owner": "alice", "correlation_id": 1, "success": true});
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let appended = s
        .append_event(&mut snap, "DeploymentStatus", payload.clone(), T0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let stored = s.list_events(0, 0).await.map_err(|e| e.to_string())?;
    match stored.as_slice() {
        [only] if *only == appended && only.payload == payload && only.kind == "DeploymentStatus" => {
            Ok(())
        }
        other => Err(format!("unexpected journal contents: {:?}", other)),
    }
}
