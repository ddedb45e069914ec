//! Transaction collaborators: builder, signer and broadcaster, plus the
//! types exchanged between them

mod builder;
mod sender;
mod signer;
mod types;

pub use builder::{BuilderClient, HttpBuilderClient};
pub use sender::{BroadcastClient, HttpBroadcastClient, Submission, SubmissionStatus};
pub use signer::{HttpSignerGateway, SignerGateway};
pub use types::{
    AssetRef, Envelope, ExecutionResult, Intent, Operation, OperationKind, PreconditionError,
    RecoveryPlan, Step, TRUSTLINE_MISSING_CODE,
};

#[cfg(test)]
pub use builder::MockBuilderClient;
#[cfg(test)]
pub use sender::MockBroadcastClient;
#[cfg(test)]
pub use signer::MockSignerGateway;
