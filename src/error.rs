//! Error types for the transaction orchestrator and price fetcher

use crate::tx::{PreconditionError, Step};

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Process-level error for the service shell
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure returned by a transaction builder
#[derive(Error, Debug, Clone)]
pub enum BuildError {
    /// Recoverable: the account is missing a trustline
    #[error("Precondition failed: {0}")]
    Precondition(PreconditionError),

    #[error("Builder rejected request: {message}")]
    Rejected {
        message: String,
        http_status: Option<u16>,
    },

    #[error("Builder unreachable: {0}")]
    Transport(String),
}

/// Failure returned by the external signer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignError {
    #[error("User rejected the signature request: {0}")]
    UserRejected(String),

    #[error("Signer unavailable: {0}")]
    Unavailable(String),
}

/// Failure returned by the broadcaster
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BroadcastError {
    #[error("Network rejected transaction {hash}: {message}")]
    Rejected { hash: String, message: String },

    #[error("Broadcast failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Broadcaster unreachable: {0}")]
    Transport(String),
}

/// Per-key failure inside the batched fetcher
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Malformed response or key: {0}")]
    Malformed(String),

    #[error("Upstream unreachable: {0}")]
    Transport(String),
}

impl FetchError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited | FetchError::Timeout(_) | FetchError::Http { status: 429, .. }
        )
    }
}

/// Why an orchestrator run ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Another run is in flight on this instance
    Busy,
    Build,
    /// The rebuilt transaction reported the precondition again
    PreconditionRepeated,
    Recovery,
    SignatureRejected,
    SignerUnavailable,
    Broadcast,
    /// The run was discarded by `reset()`
    Stale,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Busy => "busy",
            FailureKind::Build => "build",
            FailureKind::PreconditionRepeated => "precondition_repeated",
            FailureKind::Recovery => "recovery",
            FailureKind::SignatureRejected => "signature_rejected",
            FailureKind::SignerUnavailable => "signer_unavailable",
            FailureKind::Broadcast => "broadcast",
            FailureKind::Stale => "stale",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of an orchestrator run
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{step} failed ({kind}): {message}")]
pub struct OrchestratorError {
    /// Step that was active when the failure occurred
    pub step: Step,
    pub kind: FailureKind,
    pub message: String,
    /// Raw cause from the collaborator, if any
    pub cause: Option<String>,
}

impl OrchestratorError {
    pub fn new(step: Step, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl fmt::Debug) -> Self {
        self.cause = Some(format!("{:?}", cause));
        self
    }

    /// Build failures surfaced verbatim from the builder
    pub fn from_build(err: BuildError) -> Self {
        let message = match &err {
            BuildError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self::new(Step::Building, FailureKind::Build, message).with_cause(err)
    }

    pub fn from_sign(step: Step, err: SignError) -> Self {
        let kind = match err {
            SignError::UserRejected(_) => FailureKind::SignatureRejected,
            SignError::Unavailable(_) => FailureKind::SignerUnavailable,
        };
        Self::new(step, kind, err.to_string()).with_cause(err)
    }

    pub fn from_broadcast(step: Step, err: BroadcastError) -> Self {
        let message = err.to_string();
        Self::new(step, FailureKind::Broadcast, message).with_cause(err)
    }
}
