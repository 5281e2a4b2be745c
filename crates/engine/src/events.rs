//! Outbound lifecycle events.
//!
//! Events are the only channel from the ledger to its collaborators: the
//! backend executor reacts to the `*Requested` events and the frontend to the
//! `*Status` events. Each event is journaled in the same snapshot as the
//! state change it reports and then published to subscribers.

use serde::{Deserialize, Serialize};
use vnf_ledger_storage::{CorrelationId, EventRecord, Identity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerEvent {
    RegistrationRequested {
        identity: Identity,
        proof: String,
    },
    UnregistrationRequested {
        identity: Identity,
    },
    RegistrationStatus {
        identity: Identity,
        success: bool,
    },
    UnregistrationStatus {
        identity: Identity,
        success: bool,
    },
    DeployRequested {
        owner: Identity,
        correlation_id: CorrelationId,
        template_id: String,
        parameters: String,
    },
    DeploymentStatus {
        correlation_id: CorrelationId,
        owner: Identity,
        success: bool,
        external_id: String,
    },
    DeleteRequested {
        owner: Identity,
        correlation_id: CorrelationId,
        external_id: String,
    },
    DeletionStatus {
        correlation_id: CorrelationId,
        owner: Identity,
        success: bool,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::RegistrationRequested { .. } => "RegistrationRequested",
            LedgerEvent::UnregistrationRequested { .. } => "UnregistrationRequested",
            LedgerEvent::RegistrationStatus { .. } => "RegistrationStatus",
            LedgerEvent::UnregistrationStatus { .. } => "UnregistrationStatus",
            LedgerEvent::DeployRequested { .. } => "DeployRequested",
            LedgerEvent::DeploymentStatus { .. } => "DeploymentStatus",
            LedgerEvent::DeleteRequested { .. } => "DeleteRequested",
            LedgerEvent::DeletionStatus { .. } => "DeletionStatus",
        }
    }

    /// The owner or registrant this event is about.
    pub fn subject(&self) -> &Identity {
        match self {
            LedgerEvent::RegistrationRequested { identity, .. }
            | LedgerEvent::UnregistrationRequested { identity }
            | LedgerEvent::RegistrationStatus { identity, .. }
            | LedgerEvent::UnregistrationStatus { identity, .. } => identity,
            LedgerEvent::DeployRequested { owner, .. }
            | LedgerEvent::DeploymentStatus { owner, .. }
            | LedgerEvent::DeleteRequested { owner, .. }
            | LedgerEvent::DeletionStatus { owner, .. } => owner,
        }
    }

    /// The resource this event concerns, if any.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            LedgerEvent::DeployRequested { correlation_id, .. }
            | LedgerEvent::DeploymentStatus { correlation_id, .. }
            | LedgerEvent::DeleteRequested { correlation_id, .. }
            | LedgerEvent::DeletionStatus { correlation_id, .. } => Some(*correlation_id),
            _ => None,
        }
    }
}

/// A journaled event with its position and emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub emitted_at: String,
    pub event: LedgerEvent,
}

impl TryFrom<EventRecord> for EventEnvelope {
    type Error = serde_json::Error;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        Ok(EventEnvelope {
            sequence: record.sequence,
            emitted_at: record.emitted_at,
            event: serde_json::from_value(record.payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = LedgerEvent::DeployRequested {
            owner: Identity::from("alice"),
            correlation_id: CorrelationId(1),
            template_id: "tplA".to_string(),
            parameters: "cpu=2".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "DeployRequested",
                "owner": "alice",
                "correlation_id": 1,
                "template_id": "tplA",
                "parameters": "cpu=2",
            })
        );
        assert_eq!(json["type"], event.kind());
    }

    #[test]
    fn envelope_from_journal_record() {
        let event = LedgerEvent::DeletionStatus {
            correlation_id: CorrelationId(4),
            owner: Identity::from("bob"),
            success: false,
        };
        let record = EventRecord {
            sequence: 9,
            emitted_at: "2025-01-01T00:00:00Z".to_string(),
            kind: event.kind().to_string(),
            payload: serde_json::to_value(&event).unwrap(),
        };
        let envelope = EventEnvelope::try_from(record).unwrap();
        assert_eq!(envelope.sequence, 9);
        assert_eq!(envelope.event, event);
        assert_eq!(envelope.event.correlation_id(), Some(CorrelationId(4)));
        assert_eq!(envelope.event.subject(), &Identity::from("bob"));
    }
}
