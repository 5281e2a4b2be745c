//! In-process `LedgerStorage` backend.
//!
//! State lives behind a single `tokio::sync::Mutex`. A snapshot owns the
//! lock guard for its whole lifetime, so snapshots execute one at a time in
//! a strict total order. Every mutation pushes an inverse step onto an undo
//! log which is replayed (last first) when the snapshot is aborted or
//! dropped uncommitted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StorageError;
use crate::record::{CorrelationId, EventRecord, Identity, ResourceRecord};
use crate::traits::LedgerStorage;

/// Ordered ids for one owner plus a position map for O(1) membership and
/// O(1) swap-and-truncate removal.
#[derive(Debug, Default)]
struct OwnerIndex {
    entries: Vec<CorrelationId>,
    positions: HashMap<CorrelationId, usize>,
}

impl OwnerIndex {
    fn push(&mut self, id: CorrelationId) -> bool {
        if self.positions.contains_key(&id) {
            return false;
        }
        self.positions.insert(id, self.entries.len());
        self.entries.push(id);
        true
    }

    /// Returns the slot the id occupied before removal.
    fn swap_remove(&mut self, id: CorrelationId) -> Option<usize> {
        let position = self.positions.remove(&id)?;
        self.entries.swap_remove(position);
        if let Some(moved) = self.entries.get(position) {
            self.positions.insert(*moved, position);
        }
        Some(position)
    }

    fn pop(&mut self, id: CorrelationId) {
        if self.entries.last() == Some(&id) {
            self.entries.pop();
            self.positions.remove(&id);
        }
    }

    /// Inverse of `swap_remove`.
    fn restore(&mut self, id: CorrelationId, position: usize) {
        if position == self.entries.len() {
            self.entries.push(id);
        } else {
            let moved = self.entries[position];
            self.entries.push(moved);
            self.positions.insert(moved, self.entries.len() - 1);
            self.entries[position] = id;
        }
        self.positions.insert(id, position);
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    registrations: HashMap<Identity, bool>,
    records: BTreeMap<CorrelationId, ResourceRecord>,
    owner_index: HashMap<Identity, OwnerIndex>,
    last_correlation_id: u64,
    events: Vec<EventRecord>,
}

#[derive(Debug)]
enum Undo {
    Registration {
        identity: Identity,
        previous: Option<bool>,
    },
    Record {
        correlation_id: CorrelationId,
        previous: Option<ResourceRecord>,
    },
    IndexPushed {
        owner: Identity,
        correlation_id: CorrelationId,
    },
    IndexRemoved {
        owner: Identity,
        correlation_id: CorrelationId,
        position: usize,
    },
    LastCorrelationId(u64),
    EventAppended,
}

impl LedgerState {
    fn revert(&mut self, step: Undo) {
        match step {
            Undo::Registration { identity, previous } => match previous {
                Some(flag) => {
                    self.registrations.insert(identity, flag);
                }
                None => {
                    self.registrations.remove(&identity);
                }
            },
            Undo::Record {
                correlation_id,
                previous,
            } => match previous {
                Some(record) => {
                    self.records.insert(correlation_id, record);
                }
                None => {
                    self.records.remove(&correlation_id);
                }
            },
            Undo::IndexPushed {
                owner,
                correlation_id,
            } => {
                if let Some(index) = self.owner_index.get_mut(&owner) {
                    index.pop(correlation_id);
                }
            }
            Undo::IndexRemoved {
                owner,
                correlation_id,
                position,
            } => {
                self.owner_index
                    .entry(owner)
                    .or_default()
                    .restore(correlation_id, position);
            }
            Undo::LastCorrelationId(previous) => self.last_correlation_id = previous,
            Undo::EventAppended => {
                self.events.pop();
            }
        }
    }
}

/// In-memory storage backend. Cloning yields another handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

/// An open transaction against [`MemoryStorage`].
pub struct MemorySnapshot {
    guard: OwnedMutexGuard<LedgerState>,
    undo: Vec<Undo>,
    committed: bool,
}

impl Drop for MemorySnapshot {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(step) = self.undo.pop() {
            self.guard.revert(step);
        }
    }
}

impl MemorySnapshot {
    fn load(&self, correlation_id: CorrelationId) -> Result<ResourceRecord, StorageError> {
        self.guard
            .records
            .get(&correlation_id)
            .cloned()
            .ok_or(StorageError::RecordNotFound { correlation_id })
    }

    fn load_live(&self, correlation_id: CorrelationId) -> Result<ResourceRecord, StorageError> {
        let record = self.load(correlation_id)?;
        if record.deleted {
            return Err(StorageError::AlreadyDeleted { correlation_id });
        }
        Ok(record)
    }

    fn put(&mut self, record: ResourceRecord) {
        let correlation_id = record.correlation_id;
        let previous = self.guard.records.insert(correlation_id, record);
        self.undo.push(Undo::Record {
            correlation_id,
            previous,
        });
    }

    fn unindex(&mut self, owner: &Identity, correlation_id: CorrelationId) {
        let position = self
            .guard
            .owner_index
            .get_mut(owner)
            .and_then(|index| index.swap_remove(correlation_id));
        if let Some(position) = position {
            self.undo.push(Undo::IndexRemoved {
                owner: owner.clone(),
                correlation_id,
                position,
            });
        }
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        Ok(MemorySnapshot {
            guard,
            undo: Vec::new(),
            committed: false,
        })
    }

    async fn commit_snapshot(&self, mut snapshot: MemorySnapshot) -> Result<(), StorageError> {
        snapshot.committed = true;
        snapshot.undo.clear();
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn is_registered_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        identity: &Identity,
    ) -> Result<bool, StorageError> {
        Ok(snapshot
            .guard
            .registrations
            .get(identity)
            .copied()
            .unwrap_or(false))
    }

    async fn set_registered(
        &self,
        snapshot: &mut MemorySnapshot,
        identity: &Identity,
        registered: bool,
    ) -> Result<(), StorageError> {
        let previous = snapshot
            .guard
            .registrations
            .insert(identity.clone(), registered);
        snapshot.undo.push(Undo::Registration {
            identity: identity.clone(),
            previous,
        });
        Ok(())
    }

    async fn allocate_correlation_id(
        &self,
        snapshot: &mut MemorySnapshot,
    ) -> Result<CorrelationId, StorageError> {
        let previous = snapshot.guard.last_correlation_id;
        let next = previous
            .checked_add(1)
            .ok_or_else(|| StorageError::Backend("correlation id space exhausted".to_string()))?;
        snapshot.guard.last_correlation_id = next;
        snapshot.undo.push(Undo::LastCorrelationId(previous));
        Ok(CorrelationId(next))
    }

    async fn insert_record(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ResourceRecord,
    ) -> Result<(), StorageError> {
        let correlation_id = record.correlation_id;
        if snapshot.guard.records.contains_key(&correlation_id) {
            return Err(StorageError::DuplicateId { correlation_id });
        }
        let owner = record.owner.clone();
        let active = !record.deleted;
        snapshot.put(record);
        if active
            && snapshot
                .guard
                .owner_index
                .entry(owner.clone())
                .or_default()
                .push(correlation_id)
        {
            snapshot.undo.push(Undo::IndexPushed {
                owner,
                correlation_id,
            });
        }
        Ok(())
    }

    async fn get_record_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        correlation_id: CorrelationId,
    ) -> Result<ResourceRecord, StorageError> {
        snapshot.load(correlation_id)
    }

    async fn mark_deployed(
        &self,
        snapshot: &mut MemorySnapshot,
        correlation_id: CorrelationId,
        external_id: &str,
    ) -> Result<(), StorageError> {
        let mut record = snapshot.load_live(correlation_id)?;
        if external_id.is_empty() {
            return Err(StorageError::InvalidTransition {
                correlation_id,
                message: "deployed record requires a non-empty external id".to_string(),
            });
        }
        if record.deployed {
            if record.external_id == external_id {
                return Ok(());
            }
            return Err(StorageError::InvalidTransition {
                correlation_id,
                message: format!("already deployed as '{}'", record.external_id),
            });
        }
        record.deployed = true;
        record.external_id = external_id.to_string();
        snapshot.put(record);
        Ok(())
    }

    async fn mark_deployment_failed(
        &self,
        snapshot: &mut MemorySnapshot,
        correlation_id: CorrelationId,
    ) -> Result<(), StorageError> {
        let mut record = snapshot.load_live(correlation_id)?;
        if record.deployed {
            return Err(StorageError::InvalidTransition {
                correlation_id,
                message: "record is already deployed".to_string(),
            });
        }
        record.deleted = true;
        let owner = record.owner.clone();
        snapshot.put(record);
        snapshot.unindex(&owner, correlation_id);
        Ok(())
    }

    async fn mark_deletion_requested(
        &self,
        snapshot: &mut MemorySnapshot,
        correlation_id: CorrelationId,
        requested_at: &str,
    ) -> Result<(), StorageError> {
        let mut record = snapshot.load_live(correlation_id)?;
        if !record.deployed {
            return Err(StorageError::InvalidTransition {
                correlation_id,
                message: "record is not deployed".to_string(),
            });
        }
        if record.deletion_requested_at.is_some() {
            return Ok(());
        }
        record.deletion_requested_at = Some(requested_at.to_string());
        snapshot.put(record);
        Ok(())
    }

    async fn clear_deletion_request(
        &self,
        snapshot: &mut MemorySnapshot,
        correlation_id: CorrelationId,
    ) -> Result<(), StorageError> {
        let mut record = snapshot.load_live(correlation_id)?;
        if record.deletion_requested_at.is_none() {
            return Ok(());
        }
        record.deletion_requested_at = None;
        snapshot.put(record);
        Ok(())
    }

    async fn soft_delete(
        &self,
        snapshot: &mut MemorySnapshot,
        correlation_id: CorrelationId,
    ) -> Result<(), StorageError> {
        let mut record = snapshot.load_live(correlation_id)?;
        record.deleted = true;
        let owner = record.owner.clone();
        snapshot.put(record);
        snapshot.unindex(&owner, correlation_id);
        Ok(())
    }

    async fn append_event(
        &self,
        snapshot: &mut MemorySnapshot,
        kind: &str,
        payload: serde_json::Value,
        emitted_at: &str,
    ) -> Result<EventRecord, StorageError> {
        let record = EventRecord {
            sequence: snapshot.guard.events.len() as u64 + 1,
            emitted_at: emitted_at.to_string(),
            kind: kind.to_string(),
            payload,
        };
        snapshot.guard.events.push(record.clone());
        snapshot.undo.push(Undo::EventAppended);
        Ok(record)
    }

    async fn is_registered(&self, identity: &Identity) -> Result<bool, StorageError> {
        let state = self.state.lock().await;
        Ok(state.registrations.get(identity).copied().unwrap_or(false))
    }

    async fn find_record(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<ResourceRecord, StorageError> {
        let state = self.state.lock().await;
        state
            .records
            .get(&correlation_id)
            .cloned()
            .ok_or(StorageError::RecordNotFound { correlation_id })
    }

    async fn list_by_owner(&self, owner: &Identity) -> Result<Vec<ResourceRecord>, StorageError> {
        let state = self.state.lock().await;
        let Some(index) = state.owner_index.get(owner) else {
            return Ok(Vec::new());
        };
        index
            .entries
            .iter()
            .map(|id| {
                state.records.get(id).cloned().ok_or_else(|| {
                    StorageError::Backend(format!("owner index references missing record {}", id))
                })
            })
            .collect()
    }

    async fn list_records(&self) -> Result<Vec<ResourceRecord>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.records.values().cloned().collect())
    }

    async fn list_events(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let state = self.state.lock().await;
        let iter = state.events.iter().filter(|e| e.sequence > after).cloned();
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<CorrelationId> {
        raw.iter().copied().map(CorrelationId).collect()
    }

    fn index_of(raw: &[u64]) -> OwnerIndex {
        let mut index = OwnerIndex::default();
        for id in ids(raw) {
            index.push(id);
        }
        index
    }

    #[test]
    fn push_rejects_duplicates() {
        let mut index = index_of(&[1, 2]);
        assert!(!index.push(CorrelationId(1)));
        assert_eq!(index.entries, ids(&[1, 2]));
    }

    #[test]
    fn swap_remove_moves_last_into_slot() {
        let mut index = index_of(&[1, 2, 3, 4]);
        assert_eq!(index.swap_remove(CorrelationId(2)), Some(1));
        assert_eq!(index.entries, ids(&[1, 4, 3]));
        assert_eq!(index.positions[&CorrelationId(4)], 1);
        assert_eq!(index.swap_remove(CorrelationId(2)), None);
    }

    #[test]
    fn restore_inverts_swap_remove() {
        for target in 1..=4 {
            let mut index = index_of(&[1, 2, 3, 4]);
            let position = index.swap_remove(CorrelationId(target)).unwrap();
            index.restore(CorrelationId(target), position);
            assert_eq!(index.entries, ids(&[1, 2, 3, 4]), "target {}", target);
            for (i, id) in index.entries.iter().enumerate() {
                assert_eq!(index.positions[id], i);
            }
        }
    }

    #[tokio::test]
    async fn dropped_snapshot_rolls_back() {
        let storage = MemoryStorage::new();
        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            let id = storage.allocate_correlation_id(&mut snap).await.unwrap();
            let record = ResourceRecord::requested(
                id,
                Identity::from("alice"),
                "tplA",
                "",
                "2025-01-01T00:00:00Z",
            );
            storage.insert_record(&mut snap, record).await.unwrap();
            storage
                .set_registered(&mut snap, &Identity::from("alice"), true)
                .await
                .unwrap();
        }
        assert!(storage.list_records().await.unwrap().is_empty());
        assert!(!storage.is_registered(&Identity::from("alice")).await.unwrap());

        let mut snap = storage.begin_snapshot().await.unwrap();
        let id = storage.allocate_correlation_id(&mut snap).await.unwrap();
        assert_eq!(id, CorrelationId(1));
    }
}
