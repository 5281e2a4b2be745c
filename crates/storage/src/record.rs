use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque caller reference (an address on the execution substrate).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Identity(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Identity(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Identity(value)
    }
}

/// Monotonically assigned id matching confirmations to their request.
///
/// Ids start at 1; zero is never issued.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl CorrelationId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a resource, derived from the record's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Requested,
    Deployed,
    DeletionRequested,
    Deleted,
    Rejected,
}

impl ResourceState {
    /// `Rejected` and `Deleted` accept no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, ResourceState::Rejected | ResourceState::Deleted)
    }

    /// Waiting on a backend confirmation.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            ResourceState::Requested | ResourceState::DeletionRequested
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceState::Requested => "requested",
            ResourceState::Deployed => "deployed",
            ResourceState::DeletionRequested => "deletion_requested",
            ResourceState::Deleted => "deleted",
            ResourceState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource (VNF) record in the canonical store.
///
/// Records are never physically removed; `deleted` is a tombstone flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub correlation_id: CorrelationId,
    pub template_id: String,
    /// Backend-assigned handle. Empty until the deployment is confirmed.
    pub external_id: String,
    pub owner: Identity,
    pub parameters: String,
    pub deployed: bool,
    pub deleted: bool,
    /// RFC 3339 timestamp of the deploy request.
    pub requested_at: String,
    /// RFC 3339 timestamp of the oldest unanswered deletion request.
    pub deletion_requested_at: Option<String>,
}

impl ResourceRecord {
    /// A freshly requested record: not deployed, not deleted, no external id.
    pub fn requested(
        correlation_id: CorrelationId,
        owner: Identity,
        template_id: impl Into<String>,
        parameters: impl Into<String>,
        requested_at: impl Into<String>,
    ) -> Self {
        ResourceRecord {
            correlation_id,
            template_id: template_id.into(),
            external_id: String::new(),
            owner,
            parameters: parameters.into(),
            deployed: false,
            deleted: false,
            requested_at: requested_at.into(),
            deletion_requested_at: None,
        }
    }

    pub fn state(&self) -> ResourceState {
        match (self.deployed, self.deleted) {
            (true, true) => ResourceState::Deleted,
            (false, true) => ResourceState::Rejected,
            (true, false) if self.deletion_requested_at.is_some() => {
                ResourceState::DeletionRequested
            }
            (true, false) => ResourceState::Deployed,
            (false, false) => ResourceState::Requested,
        }
    }

    /// Timestamp since which the record has been waiting on the backend.
    pub fn pending_since(&self) -> Option<&str> {
        match self.state() {
            ResourceState::Requested => Some(&self.requested_at),
            ResourceState::DeletionRequested => self.deletion_requested_at.as_deref(),
            _ => None,
        }
    }
}

/// A journal entry: one lifecycle event, appended in the same snapshot as
/// the state change it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Gap-free journal position, starting at 1.
    pub sequence: u64,
    /// RFC 3339 timestamp.
    pub emitted_at: String,
    pub kind: String,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ResourceRecord {
        ResourceRecord::requested(
            CorrelationId(1),
            Identity::from("alice"),
            "tplA",
            "cpu=2",
            "2025-01-01T00:00:00Z",
        )
    }

    #[test]
    fn state_follows_flags() {
        let mut r = record();
        assert_eq!(r.state(), ResourceState::Requested);
        r.deployed = true;
        r.external_id = "ext-1".to_string();
        assert_eq!(r.state(), ResourceState::Deployed);
        r.deletion_requested_at = Some("2025-01-02T00:00:00Z".to_string());
        assert_eq!(r.state(), ResourceState::DeletionRequested);
        r.deleted = true;
        assert_eq!(r.state(), ResourceState::Deleted);
    }

    #[test]
    fn failed_deployment_is_rejected() {
        let mut r = record();
        r.deleted = true;
        assert_eq!(r.state(), ResourceState::Rejected);
        assert!(r.state().is_terminal());
    }

    #[test]
    fn pending_since_tracks_open_request() {
        let mut r = record();
        assert_eq!(r.pending_since(), Some("2025-01-01T00:00:00Z"));
        r.deployed = true;
        assert_eq!(r.pending_since(), None);
        r.deletion_requested_at = Some("2025-01-03T00:00:00Z".to_string());
        assert_eq!(r.pending_since(), Some("2025-01-03T00:00:00Z"));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["correlation_id"], serde_json::json!(1));
        assert_eq!(json["owner"], serde_json::json!("alice"));
    }
}
