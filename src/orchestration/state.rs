//! Run-state derivation for subagent runs.
//!
//! Outcomes arrive from collaborators as loose status/error strings. They
//! are classified once by [`RunOutcome::from_raw`] into a closed tag set;
//! [`derive_run_state`] then works on tags only and is the single place a
//! [`RunState`] is computed.

use serde::Serialize;

/// Closed set of terminal outcome tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Error,
    Timeout,
    /// Ended by a kill or a parent stop.
    Terminated,
}

/// How a subagent run ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn ok() -> Self {
        Self {
            status: OutcomeStatus::Ok,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            error: Some(message.into()),
        }
    }

    pub fn timeout(message: Option<String>) -> Self {
        Self {
            status: OutcomeStatus::Timeout,
            error: message,
        }
    }

    pub fn terminated(reason: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Terminated,
            error: Some(reason.into()),
        }
    }

    /// Classify a free-text outcome reported by a collaborator.
    ///
    /// Case-insensitive: `ok` is success; `timeout`, or either text
    /// mentioning "timeout"/"timed out", is a timeout; anything else is an
    /// error.
    pub fn from_raw(status: &str, error: Option<&str>) -> Self {
        let status_lc = status.trim().to_lowercase();
        let error_lc = error.unwrap_or_default().to_lowercase();
        let message = error.map(str::to_string).filter(|e| !e.trim().is_empty());

        if status_lc == "ok" {
            return Self {
                status: OutcomeStatus::Ok,
                error: message,
            };
        }
        let mentions_timeout =
            |s: &str| s.contains("timeout") || s.contains("timed out");
        if status_lc == "timeout" || mentions_timeout(&status_lc) || mentions_timeout(&error_lc) {
            return Self::timeout(message);
        }
        Self {
            status: OutcomeStatus::Error,
            error: message.or_else(|| Some(status.trim().to_string()).filter(|s| !s.is_empty())),
        }
    }
}

/// Derived lifecycle state of a subagent run. Never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RunState {
    /// Queued and running runs count against admission caps.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Queued | RunState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::TimedOut => "timed_out",
        }
    }
}

/// Derive a run's state from its timing and outcome.
pub fn derive_run_state(
    started_at: Option<i64>,
    ended_at: Option<i64>,
    outcome: Option<&RunOutcome>,
) -> RunState {
    if started_at.is_none() {
        return RunState::Queued;
    }
    if ended_at.is_none() {
        return RunState::Running;
    }
    match outcome.map(|o| o.status) {
        Some(OutcomeStatus::Ok) => RunState::Completed,
        Some(OutcomeStatus::Timeout) => RunState::TimedOut,
        Some(OutcomeStatus::Error) | Some(OutcomeStatus::Terminated) | None => RunState::Failed,
    }
}
