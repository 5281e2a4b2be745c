//! Deploy/delete lifecycle state machine.
//!
//! Per resource:
//!
//! ```text
//! Requested ──confirm ok──▶ Deployed ──request_delete──▶ DeletionRequested ──confirm ok──▶ Deleted
//!     │                        ▲                                │
//!     └──confirm fail──▶ Rejected                               └──confirm fail──┘
//! ```
//!
//! `Rejected` and `Deleted` are terminal. Each operation runs in one storage
//! snapshot: checks first, then mutations, then the journaled event, then
//! commit. A failed check drops the snapshot, so nothing is applied.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use vnf_ledger_storage::{
    CorrelationId, Identity, LedgerStorage, ResourceRecord, ResourceState, StorageError,
};

use crate::authority::{BackendAuthority, ConfirmerPolicy};
use crate::clock::{format_rfc3339, parse_rfc3339, Clock, SystemClock};
use crate::config::{EngineConfig, ListingPolicy};
use crate::error::LedgerError;
use crate::events::{EventEnvelope, LedgerEvent};

/// Orchestrates registration and the request/confirm resource lifecycle.
pub struct LifecycleEngine<S, P = BackendAuthority> {
    pub(crate) storage: S,
    pub(crate) authority: P,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<EventEnvelope>,
}

impl<S: LedgerStorage> LifecycleEngine<S, BackendAuthority> {
    /// An engine whose backend is unset until the creator calls `set_backend`.
    pub fn with_creator(storage: S, creator: Identity, config: EngineConfig) -> Self {
        Self::new(storage, BackendAuthority::new(creator), config)
    }

    pub fn set_backend(&mut self, caller: &Identity, backend: Identity) -> Result<(), LedgerError> {
        self.authority.set_backend(caller, backend)
    }

    pub fn current_backend(&self) -> Option<&Identity> {
        self.authority.current_backend()
    }
}

impl<S: LedgerStorage, P: ConfirmerPolicy> LifecycleEngine<S, P> {
    pub fn new(storage: S, authority: P, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        LifecycleEngine {
            storage,
            authority,
            config,
            clock: Arc::new(SystemClock),
            events,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn authority(&self) -> &P {
        &self.authority
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Receive every event committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    // ── Shared plumbing ──────────────────────────────────────────────────────

    pub(crate) fn now(&self, operation: &'static str) -> Result<String, LedgerError> {
        format_rfc3339(self.clock.now()).map_err(|e| LedgerError::Internal {
            operation,
            message: format!("timestamp formatting failed: {}", e),
        })
    }

    pub(crate) fn require_confirmer(
        &self,
        operation: &'static str,
        caller: &Identity,
    ) -> Result<(), LedgerError> {
        if self.authority.is_confirmer(caller) {
            return Ok(());
        }
        warn!(operation, caller = %caller, "confirm rejected: caller is not the backend");
        Err(LedgerError::Unauthorized {
            operation,
            caller: caller.clone(),
            required: "backend",
        })
    }

    pub(crate) async fn require_registered(
        &self,
        snapshot: &mut S::Snapshot,
        operation: &'static str,
        identity: &Identity,
    ) -> Result<(), LedgerError> {
        if self
            .storage
            .is_registered_for_update(snapshot, identity)
            .await?
        {
            return Ok(());
        }
        Err(LedgerError::NotRegistered {
            operation,
            identity: identity.clone(),
        })
    }

    /// Journal `event` inside the snapshot.
    pub(crate) async fn emit(
        &self,
        snapshot: &mut S::Snapshot,
        operation: &'static str,
        event: LedgerEvent,
    ) -> Result<EventEnvelope, LedgerError> {
        let payload = serde_json::to_value(&event).map_err(|e| LedgerError::Internal {
            operation,
            message: format!("event serialization failed: {}", e),
        })?;
        let emitted_at = self.now(operation)?;
        let record = self
            .storage
            .append_event(snapshot, event.kind(), payload, &emitted_at)
            .await?;
        Ok(EventEnvelope {
            sequence: record.sequence,
            emitted_at: record.emitted_at,
            event,
        })
    }

    /// Commit the snapshot, then publish the envelope to subscribers.
    pub(crate) async fn commit(
        &self,
        snapshot: S::Snapshot,
        envelope: EventEnvelope,
    ) -> Result<EventEnvelope, LedgerError> {
        self.storage.commit_snapshot(snapshot).await?;
        // No subscribers is not an error; the journal keeps the event.
        let _ = self.events.send(envelope.clone());
        Ok(envelope)
    }

    /// Load a record that must belong to `owner`. Tombstoned records are
    /// returned so callers can report their terminal state.
    async fn load_owned(
        &self,
        snapshot: &mut S::Snapshot,
        operation: &'static str,
        correlation_id: CorrelationId,
        owner: &Identity,
    ) -> Result<ResourceRecord, LedgerError> {
        let record = match self
            .storage
            .get_record_for_update(snapshot, correlation_id)
            .await
        {
            Ok(record) => record,
            Err(StorageError::RecordNotFound { .. }) => {
                return Err(LedgerError::NotFound {
                    operation,
                    correlation_id,
                })
            }
            Err(e) => return Err(e.into()),
        };
        if record.owner != *owner {
            return Err(LedgerError::NotFound {
                operation,
                correlation_id,
            });
        }
        Ok(record)
    }

    // ── Deployment ───────────────────────────────────────────────────────────

    /// A registered owner asks for a new resource built from `template_id`.
    ///
    /// Allocates the next correlation id and stores the record in the
    /// `Requested` state.
    pub async fn request_deploy(
        &self,
        owner: &Identity,
        template_id: &str,
        parameters: &str,
    ) -> Result<EventEnvelope, LedgerError> {
        const OP: &str = "request_deploy";
        if template_id.is_empty() {
            return Err(LedgerError::InvalidInput {
                operation: OP,
                field: "template_id",
            });
        }

        let mut snap = self.storage.begin_snapshot().await?;
        self.require_registered(&mut snap, OP, owner).await?;

        let correlation_id = self.storage.allocate_correlation_id(&mut snap).await?;
        let requested_at = self.now(OP)?;
        let record = ResourceRecord::requested(
            correlation_id,
            owner.clone(),
            template_id,
            parameters,
            requested_at,
        );
        match self.storage.insert_record(&mut snap, record).await {
            Ok(()) => {}
            Err(StorageError::DuplicateId { correlation_id }) => {
                error!(correlation_id = %correlation_id, "correlation id allocated twice");
                return Err(LedgerError::DuplicateId { correlation_id });
            }
            Err(e) => return Err(e.into()),
        }

        let envelope = self
            .emit(
                &mut snap,
                OP,
                LedgerEvent::DeployRequested {
                    owner: owner.clone(),
                    correlation_id,
                    template_id: template_id.to_string(),
                    parameters: parameters.to_string(),
                },
            )
            .await?;
        let envelope = self.commit(snap, envelope).await?;
        info!(correlation_id = %correlation_id, owner = %owner, template_id, "deploy requested");
        Ok(envelope)
    }

    /// The backend reports the outcome of a deployment.
    ///
    /// Success moves the record to `Deployed` with the backend's handle;
    /// failure tombstones it (`Rejected`). Any state other than `Requested`
    /// is rejected, so a re-delivered confirmation never applies twice.
    pub async fn confirm_deploy(
        &self,
        caller: &Identity,
        correlation_id: CorrelationId,
        owner: &Identity,
        success: bool,
        external_id: &str,
    ) -> Result<EventEnvelope, LedgerError> {
        const OP: &str = "confirm_deploy";
        self.require_confirmer(OP, caller)?;
        if success && external_id.is_empty() {
            return Err(LedgerError::InvalidInput {
                operation: OP,
                field: "external_id",
            });
        }

        let mut snap = self.storage.begin_snapshot().await?;
        let record = self.load_owned(&mut snap, OP, correlation_id, owner).await?;
        let state = record.state();
        if state != ResourceState::Requested {
            warn!(correlation_id = %correlation_id, state = %state, "deployment confirmation out of state");
            return Err(LedgerError::invalid_resource_state(
                OP,
                correlation_id,
                state,
                "requested",
            ));
        }

        if success {
            self.storage
                .mark_deployed(&mut snap, correlation_id, external_id)
                .await?;
        } else {
            self.storage
                .mark_deployment_failed(&mut snap, correlation_id)
                .await?;
        }

        let envelope = self
            .emit(
                &mut snap,
                OP,
                LedgerEvent::DeploymentStatus {
                    correlation_id,
                    owner: owner.clone(),
                    success,
                    external_id: external_id.to_string(),
                },
            )
            .await?;
        let envelope = self.commit(snap, envelope).await?;
        info!(correlation_id = %correlation_id, owner = %owner, success, external_id, "deployment confirmed");
        Ok(envelope)
    }

    // ── Deletion ─────────────────────────────────────────────────────────────

    /// The owner of a deployed resource asks for its deletion.
    ///
    /// The record stays `Deployed` in every observable respect (flags, owner
    /// index); only the pending-since timestamp is stamped. Re-requesting
    /// while a deletion is pending re-emits the event and keeps the original
    /// timestamp.
    pub async fn request_delete(
        &self,
        owner: &Identity,
        correlation_id: CorrelationId,
    ) -> Result<EventEnvelope, LedgerError> {
        const OP: &str = "request_delete";
        let mut snap = self.storage.begin_snapshot().await?;
        self.require_registered(&mut snap, OP, owner).await?;

        let record = match self
            .storage
            .get_record_for_update(&mut snap, correlation_id)
            .await
        {
            Ok(record) if !record.deleted => record,
            Ok(_) | Err(StorageError::RecordNotFound { .. }) => {
                return Err(LedgerError::NotFound {
                    operation: OP,
                    correlation_id,
                })
            }
            Err(e) => return Err(e.into()),
        };
        if record.owner != *owner {
            warn!(correlation_id = %correlation_id, caller = %owner, "delete requested by non-owner");
            return Err(LedgerError::Forbidden {
                operation: OP,
                caller: owner.clone(),
                target: format!("resource {}", correlation_id),
            });
        }
        let state = record.state();
        if !matches!(
            state,
            ResourceState::Deployed | ResourceState::DeletionRequested
        ) {
            return Err(LedgerError::invalid_resource_state(
                OP,
                correlation_id,
                state,
                "deployed",
            ));
        }

        let requested_at = self.now(OP)?;
        self.storage
            .mark_deletion_requested(&mut snap, correlation_id, &requested_at)
            .await?;

        let envelope = self
            .emit(
                &mut snap,
                OP,
                LedgerEvent::DeleteRequested {
                    owner: owner.clone(),
                    correlation_id,
                    external_id: record.external_id.clone(),
                },
            )
            .await?;
        let envelope = self.commit(snap, envelope).await?;
        info!(correlation_id = %correlation_id, owner = %owner, external_id = %record.external_id, "delete requested");
        Ok(envelope)
    }

    /// The backend reports the outcome of a deletion.
    ///
    /// Success soft-deletes the record and drops it from the owner index.
    /// Failure clears the pending request; the resource stays deployed and
    /// may be deleted again later.
    pub async fn confirm_delete(
        &self,
        caller: &Identity,
        correlation_id: CorrelationId,
        owner: &Identity,
        success: bool,
    ) -> Result<EventEnvelope, LedgerError> {
        const OP: &str = "confirm_delete";
        self.require_confirmer(OP, caller)?;

        let mut snap = self.storage.begin_snapshot().await?;
        let record = self.load_owned(&mut snap, OP, correlation_id, owner).await?;
        let state = record.state();
        if state != ResourceState::DeletionRequested {
            warn!(correlation_id = %correlation_id, state = %state, "deletion confirmation out of state");
            return Err(LedgerError::invalid_resource_state(
                OP,
                correlation_id,
                state,
                "deletion_requested",
            ));
        }

        if success {
            self.storage.soft_delete(&mut snap, correlation_id).await?;
        } else {
            self.storage
                .clear_deletion_request(&mut snap, correlation_id)
                .await?;
        }

        let envelope = self
            .emit(
                &mut snap,
                OP,
                LedgerEvent::DeletionStatus {
                    correlation_id,
                    owner: owner.clone(),
                    success,
                },
            )
            .await?;
        let envelope = self.commit(snap, envelope).await?;
        info!(correlation_id = %correlation_id, owner = %owner, success, "deletion confirmed");
        Ok(envelope)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// A registered owner reads one of its live records.
    ///
    /// Tombstoned records (rejected or deleted) are reported as not found.
    pub async fn get_record(
        &self,
        caller: &Identity,
        correlation_id: CorrelationId,
    ) -> Result<ResourceRecord, LedgerError> {
        const OP: &str = "get_record";
        if !self.storage.is_registered(caller).await? {
            return Err(LedgerError::NotRegistered {
                operation: OP,
                identity: caller.clone(),
            });
        }
        let record = match self.storage.find_record(correlation_id).await {
            Ok(record) if !record.deleted => record,
            Ok(_) | Err(StorageError::RecordNotFound { .. }) => {
                return Err(LedgerError::NotFound {
                    operation: OP,
                    correlation_id,
                })
            }
            Err(e) => return Err(e.into()),
        };
        if record.owner != *caller {
            return Err(LedgerError::Forbidden {
                operation: OP,
                caller: caller.clone(),
                target: format!("resource {}", correlation_id),
            });
        }
        debug!(correlation_id = %correlation_id, caller = %caller, "record read");
        Ok(record)
    }

    /// Live records of `owner`, in owner-index order (unspecified).
    ///
    /// Visibility follows the configured [`ListingPolicy`].
    pub async fn list_records(
        &self,
        caller: &Identity,
        owner: &Identity,
    ) -> Result<Vec<ResourceRecord>, LedgerError> {
        const OP: &str = "list_records";
        match self.config.listing_policy {
            ListingPolicy::SelfService => {
                if !self.storage.is_registered(caller).await? {
                    return Err(LedgerError::NotRegistered {
                        operation: OP,
                        identity: caller.clone(),
                    });
                }
                if caller != owner {
                    return Err(LedgerError::Forbidden {
                        operation: OP,
                        caller: caller.clone(),
                        target: format!("resources of '{}'", owner),
                    });
                }
            }
            ListingPolicy::BackendOnly => self.require_confirmer(OP, caller)?,
        }
        let records = self.storage.list_by_owner(owner).await?;
        debug!(owner = %owner, count = records.len(), "records listed");
        Ok(records)
    }

    /// Records waiting on the backend since at or before `older_than`.
    ///
    /// Backend only. Feeds an external supervisor that times out or
    /// re-drives stuck requests.
    pub async fn pending_requests(
        &self,
        caller: &Identity,
        older_than: OffsetDateTime,
    ) -> Result<Vec<ResourceRecord>, LedgerError> {
        const OP: &str = "pending_requests";
        self.require_confirmer(OP, caller)?;
        let records = self.storage.list_records().await?;
        Ok(records
            .into_iter()
            .filter(|r| {
                r.pending_since()
                    .and_then(parse_rfc3339)
                    .is_some_and(|since| since <= older_than)
            })
            .collect())
    }

    /// Journaled events after position `after` (0 = from the start).
    ///
    /// The backend reads the whole journal. Under [`ListingPolicy::SelfService`]
    /// anyone else reads only the events about itself; under
    /// [`ListingPolicy::BackendOnly`] nobody else reads it at all. `limit`
    /// counts visible events (0 = no limit).
    pub async fn events_since(
        &self,
        caller: &Identity,
        after: u64,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, LedgerError> {
        const OP: &str = "events_since";
        let own_only = if self.authority.is_confirmer(caller) {
            false
        } else {
            match self.config.listing_policy {
                ListingPolicy::SelfService => true,
                ListingPolicy::BackendOnly => {
                    self.require_confirmer(OP, caller)?;
                    false
                }
            }
        };

        let scan_limit = if own_only { 0 } else { limit };
        let mut events = Vec::new();
        for record in self.storage.list_events(after, scan_limit).await? {
            let envelope = EventEnvelope::try_from(record).map_err(|e| LedgerError::Internal {
                operation: OP,
                message: format!("corrupt journal entry: {}", e),
            })?;
            if own_only && envelope.event.subject() != caller {
                continue;
            }
            events.push(envelope);
            if limit != 0 && events.len() == limit {
                break;
            }
        }
        debug!(caller = %caller, after, count = events.len(), "journal read");
        Ok(events)
    }
}
