//! Type definitions for the subagent orchestration subsystem.
//!
//! These types form the shared vocabulary between the
//! [`super::manager::SubagentOrchestrator`], the run registry and the
//! gateway. All of them are plain data that serialize for protocol
//! responses; none carries live state.

use chrono::Utc;
use serde::Serialize;

use super::state::{RunOutcome, RunState, derive_run_state};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A child run spawned on behalf of a requester session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentRun {
    pub run_id: String,
    /// Session that asked for this run (the parent).
    pub requester_session_key: String,
    /// Session the subagent operates under. May itself be a requester.
    pub child_session_key: String,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

impl SubagentRun {
    pub fn state(&self) -> RunState {
        derive_run_state(self.started_at, self.ended_at, self.outcome.as_ref())
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }
}

/// What the caller wants spawned.
#[derive(Clone, Debug, Default)]
pub struct SpawnParams {
    pub task: String,
    pub label: Option<String>,
    pub agent_id: Option<String>,
    pub model: Option<String>,
    /// Route a completion message back to the requester session.
    pub expects_completion_message: bool,
}

/// Result of a spawn attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SpawnResult {
    Accepted {
        run_id: String,
        child_session_key: String,
    },
    /// Admission refused; nothing was recorded.
    Forbidden {
        active: usize,
        cap: usize,
        error: String,
    },
    /// The spawn executor failed; nothing was recorded.
    Error { error: String },
}

impl SpawnResult {
    pub fn forbidden(active: usize, cap: usize) -> Self {
        SpawnResult::Forbidden {
            active,
            cap,
            error: format!("subagent limit reached for app run ({active}/{cap})"),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SpawnResult::Accepted { .. })
    }
}
