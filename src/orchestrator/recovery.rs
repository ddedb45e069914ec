//! Trustline recovery
//!
//! When the builder reports a missing trustline it also hands back a
//! ready-made trustline transaction. Recovery signs and submits that
//! envelope as-is; the caller retries the original build afterwards.

use crate::error::{BroadcastError, FailureKind, OrchestratorError};
use crate::tx::{BroadcastClient, PreconditionError, RecoveryPlan, SignerGateway, Step};

use std::sync::Arc;
use tracing::{info, warn};

pub struct TrustlineRecoveryHandler<S: ?Sized, T: ?Sized> {
    signer: Arc<S>,
    broadcaster: Arc<T>,
}

impl<S, T> TrustlineRecoveryHandler<S, T>
where
    S: SignerGateway + ?Sized,
    T: BroadcastClient + ?Sized,
{
    pub fn new(signer: Arc<S>, broadcaster: Arc<T>) -> Self {
        Self {
            signer,
            broadcaster,
        }
    }

    /// Create the missing trustline. Returns the trustline transaction hash.
    pub async fn recover(
        &self,
        precondition: &PreconditionError,
        account: &str,
    ) -> Result<String, OrchestratorError> {
        let step = Step::RecoveringPrecondition;
        let plan = &precondition.recovery;

        if !precondition.is_missing_trustline() {
            return Err(OrchestratorError::new(
                step,
                FailureKind::Recovery,
                format!("No recovery for precondition code {}", precondition.code),
            ));
        }
        if plan.envelope.as_str().is_empty() {
            return Err(OrchestratorError::new(
                step,
                FailureKind::Recovery,
                format!("Builder sent no trustline transaction for {}", plan.asset),
            ));
        }

        info!(%account, asset = %plan.asset, "Creating missing trustline");

        let signed = self
            .signer
            .sign(&plan.envelope, account)
            .await
            .map_err(|e| {
                crate::metrics::record_recovery("sign_failed");
                OrchestratorError::from_sign(step, e)
            })?;

        let submission = self.broadcaster.send(&signed).await.map_err(|e| {
            crate::metrics::record_recovery("broadcast_failed");
            recovery_failed(plan, e)
        })?;

        let hash = submission.into_confirmed().map_err(|e| {
            warn!(%account, asset = %plan.asset, error = %e, "Trustline transaction failed");
            crate::metrics::record_recovery("rejected");
            recovery_failed(plan, e)
        })?;

        info!(%account, asset = %plan.asset, %hash, "Trustline created");
        crate::metrics::record_recovery("success");
        Ok(hash)
    }
}

fn recovery_failed(plan: &RecoveryPlan, err: BroadcastError) -> OrchestratorError {
    OrchestratorError::new(
        Step::RecoveringPrecondition,
        FailureKind::Recovery,
        format!("Trustline for {} was not submitted: {}", plan.asset, err),
    )
    .with_cause(err)
}
