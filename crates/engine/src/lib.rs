//! VNF ledger engine -- registration gating and the two-phase
//! request/confirm lifecycle for externally provisioned resources.
//!
//! User-facing calls (`request_*`) check authorization and emit an event
//! describing the requested action. The trusted backend executor performs
//! the real work off-ledger and reports the outcome through a `confirm_*`
//! call, which applies the state transition and emits a status event.
//!
//! All state lives behind a [`LedgerStorage`](vnf_ledger_storage::LedgerStorage)
//! backend; each operation is one storage snapshot, so an operation either
//! applies completely (state change + journaled event) or not at all.

pub mod authority;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
mod registry;

pub use authority::{BackendAuthority, ConfirmerPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, ListingPolicy};
pub use error::LedgerError;
pub use events::{EventEnvelope, LedgerEvent};
pub use lifecycle::LifecycleEngine;
pub use vnf_ledger_storage::{CorrelationId, Identity, ResourceRecord, ResourceState};
