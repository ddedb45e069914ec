//! Step notifications and the transition table

use crate::error::FailureKind;
use crate::tx::{AssetRef, Step};

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Emitted synchronously after every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepEvent {
    /// Run that caused the transition; `None` for `reset()`
    pub run_id: Option<Uuid>,
    pub step: Step,
    /// Asset whose trustline is being created, while recovering
    pub asset: Option<AssetRef>,
    /// Failure kind, when entering `Failed`
    pub failure: Option<FailureKind>,
}

impl StepEvent {
    pub fn new(run_id: Option<Uuid>, step: Step) -> Self {
        Self {
            run_id,
            step,
            asset: None,
            failure: None,
        }
    }

    pub fn with_asset(mut self, asset: AssetRef) -> Self {
        self.asset = Some(asset);
        self
    }

    pub fn with_failure(mut self, kind: FailureKind) -> Self {
        self.failure = Some(kind);
        self
    }
}

/// Step observer
pub type StepCallback = Arc<dyn Fn(&StepEvent) + Send + Sync>;

/// Whether the machine may move from `from` to `to`
pub fn is_legal_transition(from: Step, to: Step) -> bool {
    use Step::*;

    match (from, to) {
        // reset
        (_, Idle) => true,
        (Idle | Succeeded | Failed, Building) => true,
        (Building, RecoveringPrecondition | WaitingSignature) => true,
        (RecoveringPrecondition, Building) => true,
        (WaitingSignature, Broadcasting) => true,
        (Broadcasting, Succeeded) => true,
        (Building | RecoveringPrecondition | WaitingSignature | Broadcasting, Failed) => true,
        _ => false,
    }
}
