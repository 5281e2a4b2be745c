use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{CorrelationId, EventRecord, Identity, ResourceRecord};

/// The storage trait for VNF ledger backends.
///
/// A `LedgerStorage` implementation holds three things: the registration
/// table, the canonical resource store (keyed by correlation id, with a
/// derived per-owner index), and the append-only event journal.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()` — start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` — commit and consume the transaction
///    OR `abort_snapshot(snapshot)` — roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, every mutation made through
/// it MUST be rolled back. Snapshots are serialized: at most one is open at a
/// time, and callers holding a snapshot must use the `*_for_update` reads
/// rather than the query methods.
///
/// ## Per-owner index
///
/// A record is present in its owner's index iff it is not deleted. Removal
/// is swap-and-truncate, so index order is unspecified.
#[async_trait]
pub trait LedgerStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Registration table (within snapshot) ─────────────────────────────────

    /// Read an identity's registration flag. Unknown identities are unregistered.
    async fn is_registered_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        identity: &Identity,
    ) -> Result<bool, StorageError>;

    async fn set_registered(
        &self,
        snapshot: &mut Self::Snapshot,
        identity: &Identity,
        registered: bool,
    ) -> Result<(), StorageError>;

    // ── Resource store (within snapshot) ─────────────────────────────────────

    /// Issue the next correlation id. Ids are strictly increasing and start at 1.
    async fn allocate_correlation_id(
        &self,
        snapshot: &mut Self::Snapshot,
    ) -> Result<CorrelationId, StorageError>;

    /// Insert a record into the canonical store and, unless it is already
    /// deleted, into its owner's index.
    ///
    /// Returns `Err(StorageError::DuplicateId)` if the id is already present.
    async fn insert_record(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ResourceRecord,
    ) -> Result<(), StorageError>;

    /// Read a record (deleted or not).
    ///
    /// Returns `Err(StorageError::RecordNotFound)` if the id does not exist.
    async fn get_record_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        correlation_id: CorrelationId,
    ) -> Result<ResourceRecord, StorageError>;

    /// Set `deployed = true` and the backend-assigned external id.
    ///
    /// Repeating the call with the same external id is a no-op. The external
    /// id must be non-empty.
    async fn mark_deployed(
        &self,
        snapshot: &mut Self::Snapshot,
        correlation_id: CorrelationId,
        external_id: &str,
    ) -> Result<(), StorageError>;

    /// Tombstone a record whose deployment failed and drop it from the
    /// owner's index. Only valid for records that were never deployed.
    async fn mark_deployment_failed(
        &self,
        snapshot: &mut Self::Snapshot,
        correlation_id: CorrelationId,
    ) -> Result<(), StorageError>;

    /// Stamp the time of a pending deletion request on a deployed record.
    ///
    /// An already-pending request keeps its original timestamp.
    async fn mark_deletion_requested(
        &self,
        snapshot: &mut Self::Snapshot,
        correlation_id: CorrelationId,
        requested_at: &str,
    ) -> Result<(), StorageError>;

    /// Clear a pending deletion request (the backend reported failure).
    async fn clear_deletion_request(
        &self,
        snapshot: &mut Self::Snapshot,
        correlation_id: CorrelationId,
    ) -> Result<(), StorageError>;

    /// Tombstone a record and swap-remove it from the owner's index.
    ///
    /// Returns `Err(StorageError::AlreadyDeleted)` on a second call.
    async fn soft_delete(
        &self,
        snapshot: &mut Self::Snapshot,
        correlation_id: CorrelationId,
    ) -> Result<(), StorageError>;

    // ── Event journal (within snapshot) ──────────────────────────────────────

    /// Append an event to the journal, assigning the next sequence number.
    async fn append_event(
        &self,
        snapshot: &mut Self::Snapshot,
        kind: &str,
        payload: serde_json::Value,
        emitted_at: &str,
    ) -> Result<EventRecord, StorageError>;

    // ── Query operations (outside snapshot) ──────────────────────────────────

    async fn is_registered(&self, identity: &Identity) -> Result<bool, StorageError>;

    /// Read a record by correlation id, including tombstoned ones.
    ///
    /// Returns `Err(StorageError::RecordNotFound)` if not found.
    async fn find_record(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<ResourceRecord, StorageError>;

    /// Records in the owner's index, in index order.
    async fn list_by_owner(&self, owner: &Identity) -> Result<Vec<ResourceRecord>, StorageError>;

    /// Every record in the canonical store, ordered by correlation id.
    async fn list_records(&self) -> Result<Vec<ResourceRecord>, StorageError>;

    /// Journal entries with `sequence > after`.
    ///
    /// - `limit`: maximum number of results (0 = no limit)
    async fn list_events(&self, after: u64, limit: usize)
        -> Result<Vec<EventRecord>, StorageError>;
}
