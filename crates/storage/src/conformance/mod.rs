//! Conformance test suite for `LedgerStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any `LedgerStorage`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Insert**: id allocation, canonical insert, duplicate detection
//! - **Owner index**: membership, swap-and-truncate removal, no duplicates
//! - **Transitions**: deploy, failed deploy, deletion request, soft delete
//! - **Snapshot atomicity**: aborted or dropped snapshots leave no trace
//! - **Registration**: default-unregistered, flip and flip back
//! - **Journal**: gap-free sequencing, filtering, limits
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use vnf_ledger_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod index;
mod insert;
mod journal;
mod registration;
mod snapshot;
mod transition;

use std::fmt;
use std::future::Future;

use crate::record::{CorrelationId, Identity, ResourceRecord};
use crate::LedgerStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "insert", "index", "snapshot").
    pub category: String,
    /// Test name (e.g. "allocated_ids_start_at_one").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: LedgerStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(insert::run_insert_tests(&factory).await);
    results.extend(index::run_index_tests(&factory).await);
    results.extend(transition::run_transition_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(registration::run_registration_tests(&factory).await);
    results.extend(journal::run_journal_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

const T0: &str = "2025-01-01T00:00:00Z";

fn make_record(correlation_id: CorrelationId, owner: &str) -> ResourceRecord {
    ResourceRecord::requested(
        correlation_id,
        Identity::from(owner),
        "tpl-test",
        "cpu=1",
        T0,
    )
}

/// Allocate an id and insert a requested record for `owner` in one committed snapshot.
async fn seed_requested<S: LedgerStorage>(s: &S, owner: &str) -> Result<CorrelationId, String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let id = s
        .allocate_correlation_id(&mut snap)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_record(&mut snap, make_record(id, owner))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(id)
}

/// Seed a requested record and confirm its deployment as `ext-<id>`.
async fn seed_deployed<S: LedgerStorage>(s: &S, owner: &str) -> Result<CorrelationId, String> {
    let id = seed_requested(s, owner).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.mark_deployed(&mut snap, id, &format!("ext-{}", id))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(id)
}

/// Correlation ids currently in `owner`'s index, sorted.
async fn indexed_ids<S: LedgerStorage>(s: &S, owner: &str) -> Result<Vec<u64>, String> {
    let mut ids: Vec<u64> = s
        .list_by_owner(&Identity::from(owner))
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|r| r.correlation_id.get())
        .collect();
    ids.sort_unstable();
    Ok(ids)
}
