//! Subagent orchestration subsystem.
//!
//! Provides the [`manager::SubagentOrchestrator`] registry for tracking
//! spawned subagent runs and admitting new ones, the pure
//! [`state::derive_run_state`] derivation, the reporting [`graph`], and the
//! [`executor::SpawnExecutor`] collaborator seam.

pub mod executor;
pub mod graph;
pub mod manager;
pub mod state;
pub mod types;

pub use manager::SubagentOrchestrator;
pub use state::{OutcomeStatus, RunOutcome, RunState, derive_run_state};
pub use types::{SpawnParams, SpawnResult, SubagentRun, now_ms};
