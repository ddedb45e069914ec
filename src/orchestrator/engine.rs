//! Transaction orchestrator state machine
//!
//! Sequences Build → (Recover → Build) → Sign → Broadcast for one intent
//! at a time. A run is identified by a generation number; `reset()` bumps
//! the generation so that a run still awaiting a collaborator can no
//! longer touch the machine once its call returns.

use super::recovery::TrustlineRecoveryHandler;
use super::step::{is_legal_transition, StepCallback, StepEvent};
use crate::config::OrchestratorConfig;
use crate::error::{BuildError, FailureKind, OrchestratorError};
use crate::tx::{
    AssetRef, BroadcastClient, BuilderClient, Envelope, ExecutionResult, Intent, SignerGateway,
    Step,
};

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Mutable machine state, owned by the orchestrator
#[derive(Debug)]
struct Machine {
    step: Step,
    generation: u64,
    result: Option<ExecutionResult>,
    error: Option<OrchestratorError>,
}

/// Point-in-time view of the machine
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub step: Step,
    pub result: Option<ExecutionResult>,
    pub error: Option<OrchestratorSnapshotError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorSnapshotError {
    pub step: Step,
    pub kind: &'static str,
    pub message: String,
}

impl From<&OrchestratorError> for OrchestratorSnapshotError {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            step: err.step,
            kind: err.kind.as_str(),
            message: err.message.clone(),
        }
    }
}

pub struct TransactionOrchestrator<B: ?Sized, S: ?Sized, T: ?Sized> {
    builder: Arc<B>,
    signer: Arc<S>,
    broadcaster: Arc<T>,
    recovery: TrustlineRecoveryHandler<S, T>,
    max_recoveries: u32,
    machine: RwLock<Machine>,
    observers: Vec<StepCallback>,
}

impl<B, S, T> TransactionOrchestrator<B, S, T>
where
    B: BuilderClient + ?Sized,
    S: SignerGateway + ?Sized,
    T: BroadcastClient + ?Sized,
{
    pub fn new(
        builder: Arc<B>,
        signer: Arc<S>,
        broadcaster: Arc<T>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            recovery: TrustlineRecoveryHandler::new(signer.clone(), broadcaster.clone()),
            builder,
            signer,
            broadcaster,
            max_recoveries: config.max_precondition_recoveries,
            machine: RwLock::new(Machine {
                step: Step::Idle,
                generation: 0,
                result: None,
                error: None,
            }),
            observers: Vec::new(),
        }
    }

    /// Register a step observer. Observers run synchronously after each
    /// transition, in registration order.
    pub fn on_step<F>(&mut self, callback: F)
    where
        F: Fn(&StepEvent) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(callback));
    }

    pub async fn step(&self) -> Step {
        self.machine.read().await.step
    }

    pub async fn last_result(&self) -> Option<ExecutionResult> {
        self.machine.read().await.result.clone()
    }

    pub async fn last_error(&self) -> Option<OrchestratorError> {
        self.machine.read().await.error.clone()
    }

    pub async fn snapshot(&self) -> Snapshot {
        let machine = self.machine.read().await;
        Snapshot {
            step: machine.step,
            result: machine.result.clone(),
            error: machine.error.as_ref().map(OrchestratorSnapshotError::from),
        }
    }

    /// Return to `Idle` and drop any terminal value. A run still in flight
    /// keeps its network call but its outcome is discarded.
    pub async fn reset(&self) {
        let previous = {
            let mut machine = self.machine.write().await;
            let previous = machine.step;
            machine.generation += 1;
            machine.step = Step::Idle;
            machine.result = None;
            machine.error = None;
            previous
        };

        if !previous.accepts_execute() {
            warn!(from = %previous, "Reset while a run was in flight; its outcome will be discarded");
        }
        self.emit(&StepEvent::new(None, Step::Idle));
    }

    /// Run one intent to a terminal outcome
    pub async fn execute(&self, intent: &Intent) -> Result<ExecutionResult, OrchestratorError> {
        let run_id = Uuid::new_v4();
        let generation = self.begin(run_id).await?;
        let started = Instant::now();

        info!(%run_id, account = %intent.account, kind = %intent.kind(), "Executing intent");

        let outcome = self.run(generation, run_id, intent).await;
        self.finish(generation, run_id, intent, outcome, started).await
    }

    /// Claim the machine for a new run
    async fn begin(&self, run_id: Uuid) -> Result<u64, OrchestratorError> {
        let generation = {
            let mut machine = self.machine.write().await;
            if !machine.step.accepts_execute() {
                return Err(OrchestratorError::new(
                    machine.step,
                    FailureKind::Busy,
                    format!("Another operation is in progress ({})", machine.step),
                ));
            }
            machine.step = Step::Building;
            machine.result = None;
            machine.error = None;
            machine.generation
        };

        crate::metrics::record_step(Step::Building);
        self.emit(&StepEvent::new(Some(run_id), Step::Building));
        Ok(generation)
    }

    async fn run(
        &self,
        generation: u64,
        run_id: Uuid,
        intent: &Intent,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let mut recoveries = 0;
        let mut recovered: Option<AssetRef> = None;

        let envelope = loop {
            match self.builder.build(intent).await {
                Ok(envelope) => break envelope,
                Err(BuildError::Precondition(precondition)) if precondition.is_missing_trustline() => {
                    if recoveries >= self.max_recoveries {
                        return Err(self.precondition_exhausted(recoveries, precondition));
                    }
                    recoveries += 1;

                    let asset = precondition.recovery.asset.clone();
                    self.transition(
                        generation,
                        StepEvent::new(Some(run_id), Step::RecoveringPrecondition)
                            .with_asset(asset.clone()),
                    )
                    .await?;

                    self.recovery.recover(&precondition, &intent.account).await?;
                    recovered = Some(asset);

                    self.transition(generation, StepEvent::new(Some(run_id), Step::Building))
                        .await?;
                }
                Err(e) => return Err(OrchestratorError::from_build(e)),
            }
        };

        self.transition(generation, StepEvent::new(Some(run_id), Step::WaitingSignature))
            .await?;
        let signed = self.sign(&envelope, &intent.account).await?;

        self.transition(generation, StepEvent::new(Some(run_id), Step::Broadcasting))
            .await?;
        let hash = self
            .broadcaster
            .send(&signed)
            .await
            .and_then(|submission| submission.into_confirmed())
            .map_err(|e| OrchestratorError::from_broadcast(Step::Broadcasting, e))?;

        Ok(ExecutionResult {
            run_id,
            kind: intent.kind(),
            hash,
            success: true,
            recovered_trustline: recovered,
            completed_at: Utc::now(),
        })
    }

    async fn sign(&self, envelope: &Envelope, account: &str) -> Result<Envelope, OrchestratorError> {
        self.signer
            .sign(envelope, account)
            .await
            .map_err(|e| OrchestratorError::from_sign(Step::WaitingSignature, e))
    }

    fn precondition_exhausted(
        &self,
        recoveries: u32,
        precondition: crate::tx::PreconditionError,
    ) -> OrchestratorError {
        if recoveries == 0 {
            return OrchestratorError::from_build(BuildError::Precondition(precondition));
        }
        OrchestratorError::new(
            Step::Building,
            FailureKind::PreconditionRepeated,
            format!(
                "Trustline for {} still missing after {} recovery attempt(s)",
                precondition.recovery.asset, recoveries
            ),
        )
        .with_cause(precondition)
    }

    /// Move a live run to its next step
    async fn transition(&self, generation: u64, event: StepEvent) -> Result<(), OrchestratorError> {
        {
            let mut machine = self.machine.write().await;
            if machine.generation != generation {
                return Err(stale(machine.step));
            }
            debug_assert!(
                is_legal_transition(machine.step, event.step),
                "illegal transition {} -> {}",
                machine.step,
                event.step
            );
            debug!(run_id = ?event.run_id, from = %machine.step, to = %event.step, "Step transition");
            machine.step = event.step;
        }

        crate::metrics::record_step(event.step);
        self.emit(&event);
        Ok(())
    }

    /// Store the terminal outcome, unless the run was reset meanwhile
    async fn finish(
        &self,
        generation: u64,
        run_id: Uuid,
        intent: &Intent,
        outcome: Result<ExecutionResult, OrchestratorError>,
        started: Instant,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let kind = intent.kind();
        let event = {
            let mut machine = self.machine.write().await;
            if machine.generation != generation {
                debug!(%run_id, "Discarding outcome of a reset run");
                return Err(match outcome {
                    Err(e) if e.kind == FailureKind::Stale => e,
                    _ => stale(machine.step),
                });
            }

            match &outcome {
                Ok(result) => {
                    machine.step = Step::Succeeded;
                    machine.result = Some(result.clone());
                    StepEvent::new(Some(run_id), Step::Succeeded)
                }
                Err(e) => {
                    machine.step = Step::Failed;
                    machine.error = Some(e.clone());
                    StepEvent::new(Some(run_id), Step::Failed).with_failure(e.kind)
                }
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        match &outcome {
            Ok(result) => {
                info!(%run_id, hash = %result.hash, elapsed_secs = elapsed, "Intent succeeded");
                crate::metrics::record_execution(kind, "success", elapsed);
            }
            Err(e) => {
                if e.kind == FailureKind::SignatureRejected {
                    info!(%run_id, step = %e.step, "Intent cancelled by user");
                } else {
                    error!(%run_id, step = %e.step, kind = %e.kind, "Intent failed: {}", e.message);
                }
                crate::metrics::record_execution(kind, e.kind.as_str(), elapsed);
            }
        }

        crate::metrics::record_step(event.step);
        self.emit(&event);
        outcome
    }

    fn emit(&self, event: &StepEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }
}

fn stale(current: Step) -> OrchestratorError {
    OrchestratorError::new(
        current,
        FailureKind::Stale,
        "Operation was reset before it completed",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BroadcastError, SignError};
    use crate::tx::{
        MockBroadcastClient, MockBuilderClient, MockSignerGateway, Operation, PreconditionError,
        RecoveryPlan, Submission, SubmissionStatus, TRUSTLINE_MISSING_CODE,
    };
    use async_trait::async_trait;
    use mockall::Sequence;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    fn swap_intent() -> Intent {
        Intent::new(
            "GUSER",
            Operation::Swap {
                asset_in: "XLM".into(),
                asset_out: "USDC:GA5Z".into(),
                amount_in: "10000000".into(),
                amount_out_min: None,
            },
        )
    }

    fn vault_intent() -> Intent {
        Intent::new(
            "GUSER",
            Operation::VaultDeposit {
                vault: "CVAULT".into(),
                amount: "500".into(),
            },
        )
    }

    fn trustline_missing(envelope: &str) -> BuildError {
        BuildError::Precondition(PreconditionError {
            code: TRUSTLINE_MISSING_CODE,
            message: "Account has no USDC trustline".into(),
            recovery: RecoveryPlan {
                envelope: Envelope::new(envelope),
                asset: AssetRef {
                    code: "USDC".into(),
                    issuer: "GA5Z".into(),
                },
                description: "Add trustline".into(),
            },
        })
    }

    fn submitted(hash: &str) -> Submission {
        Submission {
            hash: hash.into(),
            status: SubmissionStatus::Success,
            message: None,
        }
    }

    fn config(max: u32) -> OrchestratorConfig {
        OrchestratorConfig {
            max_precondition_recoveries: max,
            ..Default::default()
        }
    }

    /// Orchestrator plus the list of steps it emitted
    fn recorded<B, S, T>(
        builder: B,
        signer: S,
        broadcaster: T,
    ) -> (TransactionOrchestrator<B, S, T>, Arc<Mutex<Vec<Step>>>)
    where
        B: BuilderClient,
        S: SignerGateway,
        T: BroadcastClient,
    {
        let steps = Arc::new(Mutex::new(Vec::new()));
        let mut orchestrator = TransactionOrchestrator::new(
            Arc::new(builder),
            Arc::new(signer),
            Arc::new(broadcaster),
            &config(1),
        );
        let sink = steps.clone();
        orchestrator.on_step(move |event| sink.lock().unwrap().push(event.step));
        (orchestrator, steps)
    }

    /// Signer that blocks until released, like a human taking their time
    struct GatedSigner {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl SignerGateway for GatedSigner {
        async fn sign(&self, envelope: &Envelope, _account: &str) -> Result<Envelope, SignError> {
            self.gate.notified().await;
            Ok(Envelope::new(format!("{}-signed", envelope.as_str())))
        }
    }

    #[tokio::test]
    async fn test_successful_swap() {
        let mut builder = MockBuilderClient::new();
        builder
            .expect_build()
            .times(1)
            .returning(|_| Ok(Envelope::new("E1")));

        let mut signer = MockSignerGateway::new();
        signer
            .expect_sign()
            .withf(|env, account| env.as_str() == "E1" && account == "GUSER")
            .times(1)
            .returning(|_, _| Ok(Envelope::new("E1-signed")));

        let mut broadcaster = MockBroadcastClient::new();
        broadcaster
            .expect_send()
            .withf(|env| env.as_str() == "E1-signed")
            .times(1)
            .returning(|_| Ok(submitted("abc")));

        let (orchestrator, steps) = recorded(builder, signer, broadcaster);
        let result = orchestrator.execute(&swap_intent()).await.unwrap();

        assert_eq!(result.hash, "abc");
        assert!(result.success);
        assert_eq!(result.recovered_trustline, None);
        assert_eq!(orchestrator.step().await, Step::Succeeded);
        assert_eq!(orchestrator.last_result().await, Some(result));
        assert_eq!(
            *steps.lock().unwrap(),
            vec![
                Step::Building,
                Step::WaitingSignature,
                Step::Broadcasting,
                Step::Succeeded
            ]
        );
    }

    #[tokio::test]
    async fn test_trustline_recovery_then_retry() {
        let mut seq = Sequence::new();
        let mut builder = MockBuilderClient::new();
        builder
            .expect_build()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(trustline_missing("T1")));
        builder
            .expect_build()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Envelope::new("E2")));

        let mut signer = MockSignerGateway::new();
        signer
            .expect_sign()
            .withf(|env, _| env.as_str() == "T1")
            .times(1)
            .returning(|_, _| Ok(Envelope::new("T1-signed")));
        signer
            .expect_sign()
            .withf(|env, _| env.as_str() == "E2")
            .times(1)
            .returning(|_, _| Ok(Envelope::new("E2-signed")));

        let mut broadcaster = MockBroadcastClient::new();
        broadcaster
            .expect_send()
            .withf(|env| env.as_str() == "T1-signed")
            .times(1)
            .returning(|_| Ok(submitted("trust")));
        broadcaster
            .expect_send()
            .withf(|env| env.as_str() == "E2-signed")
            .times(1)
            .returning(|_| Ok(submitted("deposit")));

        let (orchestrator, steps) = recorded(builder, signer, broadcaster);
        let result = orchestrator.execute(&vault_intent()).await.unwrap();

        assert_eq!(result.hash, "deposit");
        assert_eq!(result.recovered_trustline.unwrap().code, "USDC");
        assert_eq!(orchestrator.step().await, Step::Succeeded);
        assert_eq!(
            *steps.lock().unwrap(),
            vec![
                Step::Building,
                Step::RecoveringPrecondition,
                Step::Building,
                Step::WaitingSignature,
                Step::Broadcasting,
                Step::Succeeded
            ]
        );
    }

    #[tokio::test]
    async fn test_recovery_event_carries_asset() {
        let mut seq = Sequence::new();
        let mut builder = MockBuilderClient::new();
        builder
            .expect_build()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(trustline_missing("T1")));
        builder
            .expect_build()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Envelope::new("E2")));
        let mut signer = MockSignerGateway::new();
        signer
            .expect_sign()
            .returning(|env, _| Ok(Envelope::new(format!("{}-signed", env.as_str()))));
        let mut broadcaster = MockBroadcastClient::new();
        broadcaster.expect_send().returning(|_| Ok(submitted("h")));

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut orchestrator = TransactionOrchestrator::new(
            Arc::new(builder),
            Arc::new(signer),
            Arc::new(broadcaster),
            &config(1),
        );
        let sink = events.clone();
        orchestrator.on_step(move |event| sink.lock().unwrap().push(event.clone()));

        orchestrator.execute(&vault_intent()).await.unwrap();

        let events = events.lock().unwrap();
        let recovering = events
            .iter()
            .find(|e| e.step == Step::RecoveringPrecondition)
            .unwrap();
        assert_eq!(recovering.asset.as_ref().unwrap().code, "USDC");
        assert!(events.iter().all(|e| e.run_id == events[0].run_id));
    }

    #[tokio::test]
    async fn test_repeated_precondition_is_fatal() {
        let mut builder = MockBuilderClient::new();
        builder
            .expect_build()
            .times(2)
            .returning(|_| Err(trustline_missing("T1")));

        let mut signer = MockSignerGateway::new();
        signer
            .expect_sign()
            .times(1)
            .returning(|_, _| Ok(Envelope::new("T1-signed")));
        let mut broadcaster = MockBroadcastClient::new();
        broadcaster
            .expect_send()
            .times(1)
            .returning(|_| Ok(submitted("trust")));

        let (orchestrator, steps) = recorded(builder, signer, broadcaster);
        let err = orchestrator.execute(&vault_intent()).await.unwrap_err();

        assert_eq!(err.step, Step::Building);
        assert_eq!(err.kind, FailureKind::PreconditionRepeated);
        assert_eq!(orchestrator.step().await, Step::Failed);
        assert_eq!(orchestrator.last_error().await, Some(err));
        assert_eq!(
            *steps.lock().unwrap(),
            vec![
                Step::Building,
                Step::RecoveringPrecondition,
                Step::Building,
                Step::Failed
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_recovery_budget_fails_immediately() {
        let mut builder = MockBuilderClient::new();
        builder
            .expect_build()
            .times(1)
            .returning(|_| Err(trustline_missing("T1")));
        let mut signer = MockSignerGateway::new();
        signer.expect_sign().never();
        let mut broadcaster = MockBroadcastClient::new();
        broadcaster.expect_send().never();

        let orchestrator = TransactionOrchestrator::new(
            Arc::new(builder),
            Arc::new(signer),
            Arc::new(broadcaster),
            &config(0),
        );
        let err = orchestrator.execute(&vault_intent()).await.unwrap_err();
        assert_eq!(err.step, Step::Building);
        assert_eq!(err.kind, FailureKind::Build);
    }

    #[tokio::test]
    async fn test_build_errors_never_trigger_recovery() {
        let failures = vec![
            BuildError::Rejected {
                message: "insufficient balance".into(),
                http_status: Some(400),
            },
            BuildError::Rejected {
                message: "no route found".into(),
                http_status: Some(404),
            },
            BuildError::Transport("connection refused".into()),
        ];

        for failure in failures {
            let expected = failure.clone();
            let mut builder = MockBuilderClient::new();
            builder
                .expect_build()
                .times(1)
                .returning(move |_| Err(failure.clone()));
            let mut signer = MockSignerGateway::new();
            signer.expect_sign().never();
            let mut broadcaster = MockBroadcastClient::new();
            broadcaster.expect_send().never();

            let (orchestrator, steps) = recorded(builder, signer, broadcaster);
            let err = orchestrator.execute(&swap_intent()).await.unwrap_err();

            assert_eq!(err.step, Step::Building);
            assert_eq!(err.kind, FailureKind::Build);
            if let BuildError::Rejected { message, .. } = expected {
                assert_eq!(err.message, message);
            }
            assert_eq!(*steps.lock().unwrap(), vec![Step::Building, Step::Failed]);
        }
    }

    #[tokio::test]
    async fn test_user_rejection_skips_broadcast() {
        let mut builder = MockBuilderClient::new();
        builder
            .expect_build()
            .returning(|_| Ok(Envelope::new("E1")));
        let mut signer = MockSignerGateway::new();
        signer
            .expect_sign()
            .times(1)
            .returning(|_, _| Err(SignError::UserRejected("User closed the wallet".into())));
        let mut broadcaster = MockBroadcastClient::new();
        broadcaster.expect_send().never();

        let (orchestrator, steps) = recorded(builder, signer, broadcaster);
        let err = orchestrator.execute(&swap_intent()).await.unwrap_err();

        assert_eq!(err.step, Step::WaitingSignature);
        assert_eq!(err.kind, FailureKind::SignatureRejected);
        assert_eq!(
            *steps.lock().unwrap(),
            vec![Step::Building, Step::WaitingSignature, Step::Failed]
        );
    }

    #[tokio::test]
    async fn test_recovery_failure_stops_run() {
        let mut builder = MockBuilderClient::new();
        builder
            .expect_build()
            .times(1)
            .returning(|_| Err(trustline_missing("T1")));
        let mut signer = MockSignerGateway::new();
        signer
            .expect_sign()
            .times(1)
            .returning(|_, _| Err(SignError::Unavailable("wallet offline".into())));
        let mut broadcaster = MockBroadcastClient::new();
        broadcaster.expect_send().never();

        let (orchestrator, _) = recorded(builder, signer, broadcaster);
        let err = orchestrator.execute(&vault_intent()).await.unwrap_err();

        assert_eq!(err.step, Step::RecoveringPrecondition);
        assert_eq!(err.kind, FailureKind::SignerUnavailable);
        assert_eq!(orchestrator.step().await, Step::Failed);
    }

    #[tokio::test]
    async fn test_broadcast_failures() {
        let replies: Vec<(Result<Submission, BroadcastError>, &str)> = vec![
            (
                Err(BroadcastError::Http {
                    status: 500,
                    message: "internal".into(),
                }),
                "internal",
            ),
            (
                Ok(Submission {
                    hash: "abc".into(),
                    status: SubmissionStatus::Failed,
                    message: Some("tx_insufficient_fee".into()),
                }),
                "tx_insufficient_fee",
            ),
        ];

        for (reply, reason) in replies {
            let mut builder = MockBuilderClient::new();
            builder
                .expect_build()
                .returning(|_| Ok(Envelope::new("E1")));
            let mut signer = MockSignerGateway::new();
            signer
                .expect_sign()
                .returning(|_, _| Ok(Envelope::new("E1-signed")));
            let mut broadcaster = MockBroadcastClient::new();
            broadcaster
                .expect_send()
                .times(1)
                .returning(move |_| reply.clone());

            let (orchestrator, _) = recorded(builder, signer, broadcaster);
            let err = orchestrator.execute(&swap_intent()).await.unwrap_err();

            assert_eq!(err.step, Step::Broadcasting);
            assert_eq!(err.kind, FailureKind::Broadcast);
            assert!(err.message.contains(reason), "{}", err.message);
            assert_eq!(orchestrator.step().await, Step::Failed);
        }
    }

    #[tokio::test]
    async fn test_single_flight_rejects_second_execute() {
        let gate = Arc::new(Notify::new());
        let mut builder = MockBuilderClient::new();
        builder
            .expect_build()
            .times(1)
            .returning(|_| Ok(Envelope::new("E1")));
        let mut broadcaster = MockBroadcastClient::new();
        broadcaster
            .expect_send()
            .times(1)
            .returning(|_| Ok(submitted("abc")));

        let orchestrator = Arc::new(TransactionOrchestrator::new(
            Arc::new(builder),
            Arc::new(GatedSigner { gate: gate.clone() }),
            Arc::new(broadcaster),
            &config(1),
        ));

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.execute(&swap_intent()).await }
        });

        while orchestrator.step().await != Step::WaitingSignature {
            tokio::task::yield_now().await;
        }

        let err = orchestrator.execute(&swap_intent()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Busy);
        assert_eq!(err.step, Step::WaitingSignature);
        // The rejected call must not disturb the live run
        assert_eq!(orchestrator.step().await, Step::WaitingSignature);

        gate.notify_one();
        let result = first.await.unwrap().unwrap();
        assert_eq!(result.hash, "abc");
        assert_eq!(orchestrator.step().await, Step::Succeeded);
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_outcome() {
        let gate = Arc::new(Notify::new());
        let mut builder = MockBuilderClient::new();
        builder
            .expect_build()
            .times(1)
            .returning(|_| Ok(Envelope::new("E1")));
        let mut broadcaster = MockBroadcastClient::new();
        broadcaster.expect_send().never();

        let orchestrator = Arc::new(TransactionOrchestrator::new(
            Arc::new(builder),
            Arc::new(GatedSigner { gate: gate.clone() }),
            Arc::new(broadcaster),
            &config(1),
        ));

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.execute(&swap_intent()).await }
        });

        while orchestrator.step().await != Step::WaitingSignature {
            tokio::task::yield_now().await;
        }

        orchestrator.reset().await;
        assert_eq!(orchestrator.step().await, Step::Idle);

        gate.notify_one();
        let err = first.await.unwrap().unwrap_err();
        assert_eq!(err.kind, FailureKind::Stale);
        assert_eq!(orchestrator.step().await, Step::Idle);
        assert!(orchestrator.last_result().await.is_none());
        assert!(orchestrator.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_execute_again_after_failure() {
        let mut seq = Sequence::new();
        let mut builder = MockBuilderClient::new();
        builder
            .expect_build()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(BuildError::Rejected {
                    message: "insufficient balance".into(),
                    http_status: Some(400),
                })
            });
        builder
            .expect_build()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Envelope::new("E1")));
        let mut signer = MockSignerGateway::new();
        signer
            .expect_sign()
            .returning(|_, _| Ok(Envelope::new("E1-signed")));
        let mut broadcaster = MockBroadcastClient::new();
        broadcaster.expect_send().returning(|_| Ok(submitted("abc")));

        let (orchestrator, _) = recorded(builder, signer, broadcaster);

        assert!(orchestrator.execute(&swap_intent()).await.is_err());
        assert_eq!(orchestrator.step().await, Step::Failed);

        orchestrator.reset().await;
        let result = orchestrator.execute(&swap_intent()).await.unwrap();
        assert_eq!(result.hash, "abc");
        assert!(orchestrator.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_reports_failure() {
        let mut builder = MockBuilderClient::new();
        builder.expect_build().returning(|_| {
            Err(BuildError::Rejected {
                message: "no route found".into(),
                http_status: Some(404),
            })
        });
        let (orchestrator, _) =
            recorded(builder, MockSignerGateway::new(), MockBroadcastClient::new());

        let _ = orchestrator.execute(&swap_intent()).await;
        let snapshot = orchestrator.snapshot().await;

        assert_eq!(snapshot.step, Step::Failed);
        let error = snapshot.error.unwrap();
        assert_eq!(error.kind, "build");
        assert_eq!(error.message, "no route found");
    }
}
