//! Beatline - wave planning and auto-verification for beads-tracked
//! agent workflows.
//!
//! The tracker (the beads CLI) stays the source of truth; everything here
//! is either a transient projection of it (wave plans, readiness boards)
//! or a workflow that writes back through it (auto-verification).

pub mod agent;
pub mod commands;
pub mod config;
pub mod error;
pub mod plan;
pub mod session;
pub mod subprocess;
pub mod telemetry;
pub mod tracker;
pub mod verify;
