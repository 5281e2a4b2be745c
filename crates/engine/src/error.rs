use vnf_ledger_storage::{CorrelationId, Identity, ResourceState, StorageError};

/// Rejection of a ledger operation.
///
/// Every variant names the operation and the predicate that failed. No
/// state is committed when an operation returns an error.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The caller lacks the role the operation requires (backend or creator).
    #[error("{operation}: caller '{caller}' is not the {required}")]
    Unauthorized {
        operation: &'static str,
        caller: Identity,
        required: &'static str,
    },

    /// The identity must be a registered user.
    #[error("{operation}: identity '{identity}' is not a registered user")]
    NotRegistered {
        operation: &'static str,
        identity: Identity,
    },

    /// The correlation id does not exist, is tombstoned, or does not belong
    /// to the stated owner.
    #[error("{operation}: resource {correlation_id} not found")]
    NotFound {
        operation: &'static str,
        correlation_id: CorrelationId,
    },

    /// The target exists but the caller is not its owner.
    #[error("{operation}: caller '{caller}' may not access {target}")]
    Forbidden {
        operation: &'static str,
        caller: Identity,
        target: String,
    },

    /// The operation is not valid in the target's current lifecycle state.
    #[error("{operation}: {target} is {state}, expected {expected}")]
    InvalidState {
        operation: &'static str,
        target: String,
        state: String,
        expected: &'static str,
    },

    /// Correlation id collision. Unreachable with monotonic allocation.
    #[error("duplicate correlation id {correlation_id}")]
    DuplicateId { correlation_id: CorrelationId },

    /// A required opaque field was empty.
    #[error("{operation}: missing required field '{field}'")]
    InvalidInput {
        operation: &'static str,
        field: &'static str,
    },

    #[error("{operation}: {message}")]
    Internal {
        operation: &'static str,
        message: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    pub(crate) fn invalid_resource_state(
        operation: &'static str,
        correlation_id: CorrelationId,
        state: ResourceState,
        expected: &'static str,
    ) -> Self {
        LedgerError::InvalidState {
            operation,
            target: format!("resource {}", correlation_id),
            state: state.as_str().to_string(),
            expected,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Unauthorized { .. } => "unauthorized",
            LedgerError::NotRegistered { .. } => "not_registered",
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::Forbidden { .. } => "forbidden",
            LedgerError::InvalidState { .. } => "invalid_state",
            LedgerError::DuplicateId { .. } => "duplicate_id",
            LedgerError::InvalidInput { .. } => "invalid_input",
            LedgerError::Internal { .. } => "internal",
            LedgerError::Storage(_) => "storage",
        }
    }

    /// Whether resubmitting the same call later can succeed without any
    /// other party changing its mind.
    ///
    /// A missing registration may still be confirmed, and a record waiting
    /// on the backend leaves its pending state once confirmed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::NotRegistered { .. } => true,
            LedgerError::InvalidState { state, .. } => {
                state == ResourceState::Requested.as_str()
                    || state == ResourceState::DeletionRequested.as_str()
            }
            LedgerError::Storage(StorageError::Backend(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_state_is_retryable() {
        let err = LedgerError::invalid_resource_state(
            "request_delete",
            CorrelationId(3),
            ResourceState::Requested,
            "deployed",
        );
        assert!(err.is_retryable());
        assert_eq!(err.code(), "invalid_state");
        assert_eq!(
            err.to_string(),
            "request_delete: resource 3 is requested, expected deployed"
        );
    }

    #[test]
    fn terminal_state_is_permanent() {
        let err = LedgerError::invalid_resource_state(
            "confirm_deploy",
            CorrelationId(2),
            ResourceState::Rejected,
            "requested",
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn forbidden_is_permanent() {
        let err = LedgerError::Forbidden {
            operation: "request_delete",
            caller: Identity::from("mallory"),
            target: "resource 1".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "request_delete: caller 'mallory' may not access resource 1"
        );
    }
}
