//! Who may confirm backend outcomes.

use tracing::info;
use vnf_ledger_storage::Identity;

use crate::error::LedgerError;

/// Authorization policy for confirm operations.
///
/// The engine only asks whether a caller may confirm; swapping in a
/// multi-backend or role-set policy needs no engine change.
pub trait ConfirmerPolicy: Send + Sync + 'static {
    fn is_confirmer(&self, identity: &Identity) -> bool;
}

/// A single mutable backend identity, set by an immutable creator.
///
/// Until [`BackendAuthority::set_backend`] is called nobody may confirm.
#[derive(Debug, Clone)]
pub struct BackendAuthority {
    creator: Identity,
    backend: Option<Identity>,
}

impl BackendAuthority {
    pub fn new(creator: Identity) -> Self {
        BackendAuthority {
            creator,
            backend: None,
        }
    }

    pub fn creator(&self) -> &Identity {
        &self.creator
    }

    pub fn current_backend(&self) -> Option<&Identity> {
        self.backend.as_ref()
    }

    /// Overwrite the backend identity. Only the creator may call this.
    pub fn set_backend(&mut self, caller: &Identity, backend: Identity) -> Result<(), LedgerError> {
        if *caller != self.creator {
            return Err(LedgerError::Unauthorized {
                operation: "set_backend",
                caller: caller.clone(),
                required: "creator",
            });
        }
        if backend.is_empty() {
            return Err(LedgerError::InvalidInput {
                operation: "set_backend",
                field: "backend",
            });
        }
        info!(backend = %backend, previous = ?self.backend, "backend authority updated");
        self.backend = Some(backend);
        Ok(())
    }
}

impl ConfirmerPolicy for BackendAuthority {
    fn is_confirmer(&self, identity: &Identity) -> bool {
        self.backend.as_ref() == Some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nobody_confirms_before_backend_is_set() {
        let authority = BackendAuthority::new(Identity::from("creator"));
        assert!(!authority.is_confirmer(&Identity::from("creator")));
        assert!(authority.current_backend().is_none());
    }

    #[test]
    fn only_creator_sets_backend() {
        let mut authority = BackendAuthority::new(Identity::from("creator"));
        let err = authority
            .set_backend(&Identity::from("mallory"), Identity::from("mallory"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { required: "creator", .. }));

        authority
            .set_backend(&Identity::from("creator"), Identity::from("backend-1"))
            .unwrap();
        assert!(authority.is_confirmer(&Identity::from("backend-1")));
    }

    #[test]
    fn set_backend_overwrites() {
        let creator = Identity::from("creator");
        let mut authority = BackendAuthority::new(creator.clone());
        authority
            .set_backend(&creator, Identity::from("backend-1"))
            .unwrap();
        authority
            .set_backend(&creator, Identity::from("backend-2"))
            .unwrap();
        assert!(!authority.is_confirmer(&Identity::from("backend-1")));
        assert!(authority.is_confirmer(&Identity::from("backend-2")));
    }
}
