use std::future::Future;

use super::TestResult;
use crate::{Identity, LedgerStorage};

pub(super) async fn run_registration_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "registration",
            "unknown_identity_is_unregistered",
            unknown_identity_is_unregistered(factory).await,
        ),
        TestResult::from_result(
            "registration",
            "set_registered_round_trips",
            set_registered_round_trips(factory).await,
        ),
        TestResult::from_result(
            "registration",
            "registration_visible_inside_snapshot",
            registration_visible_inside_snapshot(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn unknown_identity_is_unregistered<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    if s.is_registered(&Identity::from("stranger"))
        .await
        .map_err(|e| e.to_string())?
    {
        return Err("unknown identity reported as registered".to_string());
    }
    Ok(())
}

/// Registering and then unregistering leaves the identity unregistered;
/// other identities are unaffected.
async fn set_registered_round_trips<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let alice = Identity::from("alice");
    let bob = Identity::from("bob");

    for (identity, flag) in [(&alice, true), (&bob, true), (&alice, false)] {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.set_registered(&mut snap, identity, flag)
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }

    if s.is_registered(&alice).await.map_err(|e| e.to_string())? {
        return Err("alice should be unregistered".to_string());
    }
    if !s.is_registered(&bob).await.map_err(|e| e.to_string())? {
        return Err("bob should be registered".to_string());
    }
    Ok(())
}

async fn registration_visible_inside_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let seen = s
        .is_registered_for_update(&mut snap, &alice)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if !seen {
        return Err("snapshot did not observe its own write".to_string());
    }
    Ok(())
}
