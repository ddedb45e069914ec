//! Transaction orchestration
//!
//! The orchestrator:
//! 1. Requests an unsigned envelope from the builder
//! 2. Repairs a missing trustline once, then rebuilds
//! 3. Has the account holder sign the envelope
//! 4. Broadcasts it and reports a terminal outcome

pub mod engine;
pub mod recovery;
pub mod step;

pub use engine::TransactionOrchestrator;
