//! In-memory session state
//!
//! Holds one orchestrator per account so the single-flight invariant
//! applies per user rather than per process.

mod registry;

pub use registry::SessionRegistry;
