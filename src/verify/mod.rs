//! The verification workflow: label state machine, per-item locks, the
//! verifier prompt protocol, and the orchestrator that drives them.

pub mod labels;
pub mod locks;
pub mod orchestrator;
pub mod prompt;
