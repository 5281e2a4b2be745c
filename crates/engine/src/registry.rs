//! Identity registry: which callers are registered users.
//!
//! Registration and unregistration follow the same request/confirm split as
//! resources. A request only signals intent; the flag changes when the
//! backend confirms success. A failed confirmation leaves the flag alone.

use tracing::info;
use vnf_ledger_storage::{Identity, LedgerStorage};

use crate::authority::ConfirmerPolicy;
use crate::error::LedgerError;
use crate::events::{EventEnvelope, LedgerEvent};
use crate::lifecycle::LifecycleEngine;

impl<S: LedgerStorage, P: ConfirmerPolicy> LifecycleEngine<S, P> {
    pub async fn is_registered(&self, identity: &Identity) -> Result<bool, LedgerError> {
        Ok(self.storage.is_registered(identity).await?)
    }

    /// `caller` asks to become a registered user, presenting an opaque proof
    /// the backend verifies off-ledger.
    pub async fn request_registration(
        &self,
        caller: &Identity,
        proof: &str,
    ) -> Result<EventEnvelope, LedgerError> {
        const OP: &str = "request_registration";
        if proof.is_empty() {
            return Err(LedgerError::InvalidInput {
                operation: OP,
                field: "proof",
            });
        }

        let mut snap = self.storage.begin_snapshot().await?;
        if self
            .storage
            .is_registered_for_update(&mut snap, caller)
            .await?
        {
            return Err(LedgerError::InvalidState {
                operation: OP,
                target: format!("identity '{}'", caller),
                state: "registered".to_string(),
                expected: "unregistered",
            });
        }

        let envelope = self
            .emit(
                &mut snap,
                OP,
                LedgerEvent::RegistrationRequested {
                    identity: caller.clone(),
                    proof: proof.to_string(),
                },
            )
            .await?;
        let envelope = self.commit(snap, envelope).await?;
        info!(identity = %caller, "registration requested");
        Ok(envelope)
    }

    /// The backend reports whether `identity`'s registration succeeded.
    pub async fn confirm_registration(
        &self,
        caller: &Identity,
        identity: &Identity,
        success: bool,
    ) -> Result<EventEnvelope, LedgerError> {
        const OP: &str = "confirm_registration";
        self.require_confirmer(OP, caller)?;
        if identity.is_empty() {
            return Err(LedgerError::InvalidInput {
                operation: OP,
                field: "identity",
            });
        }

        let mut snap = self.storage.begin_snapshot().await?;
        if success {
            self.storage.set_registered(&mut snap, identity, true).await?;
        }
        let envelope = self
            .emit(
                &mut snap,
                OP,
                LedgerEvent::RegistrationStatus {
                    identity: identity.clone(),
                    success,
                },
            )
            .await?;
        let envelope = self.commit(snap, envelope).await?;
        info!(identity = %identity, success, "registration confirmed");
        Ok(envelope)
    }

    /// A registered `caller` asks to be unregistered.
    pub async fn request_unregistration(
        &self,
        caller: &Identity,
    ) -> Result<EventEnvelope, LedgerError> {
        const OP: &str = "request_unregistration";
        let mut snap = self.storage.begin_snapshot().await?;
        self.require_registered(&mut snap, OP, caller).await?;

        let envelope = self
            .emit(
                &mut snap,
                OP,
                LedgerEvent::UnregistrationRequested {
                    identity: caller.clone(),
                },
            )
            .await?;
        let envelope = self.commit(snap, envelope).await?;
        info!(identity = %caller, "unregistration requested");
        Ok(envelope)
    }

    /// The backend reports whether `identity`'s unregistration succeeded.
    ///
    /// The identity's resources are untouched; they become unreachable for
    /// user operations until it registers again.
    pub async fn confirm_unregistration(
        &self,
        caller: &Identity,
        identity: &Identity,
        success: bool,
    ) -> Result<EventEnvelope, LedgerError> {
        const OP: &str = "confirm_unregistration";
        self.require_confirmer(OP, caller)?;
        if identity.is_empty() {
            return Err(LedgerError::InvalidInput {
                operation: OP,
                field: "identity",
            });
        }

        let mut snap = self.storage.begin_snapshot().await?;
        if success {
            self.storage
                .set_registered(&mut snap, identity, false)
                .await?;
        }
        let envelope = self
            .emit(
                &mut snap,
                OP,
                LedgerEvent::UnregistrationStatus {
                    identity: identity.clone(),
                    success,
                },
            )
            .await?;
        let envelope = self.commit(snap, envelope).await?;
        info!(identity = %identity, success, "unregistration confirmed");
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use vnf_ledger_storage::MemoryStorage;

    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> LifecycleEngine<MemoryStorage> {
        let creator = Identity::from("creator");
        let mut engine = LifecycleEngine::with_creator(
            MemoryStorage::new(),
            creator.clone(),
            EngineConfig::default(),
        );
        engine
            .set_backend(&creator, Identity::from("backend"))
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn request_alone_does_not_register() {
        let engine = engine();
        let alice = Identity::from("alice");
        let envelope = engine.request_registration(&alice, "sig").await.unwrap();
        assert_eq!(
            envelope.event,
            LedgerEvent::RegistrationRequested {
                identity: alice.clone(),
                proof: "sig".to_string(),
            }
        );
        assert!(!engine.is_registered(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn failed_confirmation_keeps_prior_flag() {
        let engine = engine();
        let backend = Identity::from("backend");
        let alice = Identity::from("alice");
        engine
            .confirm_registration(&backend, &alice, true)
            .await
            .unwrap();
        engine
            .confirm_registration(&backend, &alice, false)
            .await
            .unwrap();
        assert!(engine.is_registered(&alice).await.unwrap());

        engine
            .confirm_unregistration(&backend, &alice, false)
            .await
            .unwrap();
        assert!(engine.is_registered(&alice).await.unwrap());

        engine
            .confirm_unregistration(&backend, &alice, true)
            .await
            .unwrap();
        assert!(!engine.is_registered(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn empty_proof_is_rejected() {
        let engine = engine();
        let err = engine
            .request_registration(&Identity::from("alice"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput { field: "proof", .. }));
    }

    #[tokio::test]
    async fn unregistration_requires_registration() {
        let engine = engine();
        let err = engine
            .request_unregistration(&Identity::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotRegistered { .. }));
    }

    #[tokio::test]
    async fn registered_identity_cannot_request_again() {
        let engine = engine();
        let alice = Identity::from("alice");
        engine
            .confirm_registration(&Identity::from("backend"), &alice, true)
            .await
            .unwrap();
        let err = engine.request_registration(&alice, "sig").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn empty_identity_is_never_confirmed() {
        let engine = engine();
        let backend = Identity::from("backend");
        let nobody = Identity::from("");
        for success in [true, false] {
            let err = engine
                .confirm_registration(&backend, &nobody, success)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidInput { field: "identity", .. }));
            let err = engine
                .confirm_unregistration(&backend, &nobody, success)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidInput { field: "identity", .. }));
        }
        assert!(!engine.is_registered(&nobody).await.unwrap());
        assert!(engine
            .events_since(&backend, 0, 0)
            .await
            .unwrap()
            .is_empty());
    }
}
