//! The spawn collaborator.
//!
//! The orchestrator decides *whether* a subagent may start; a
//! [`SpawnExecutor`] decides *how*. Executors receive a cancellation token
//! derived from the parent run's token and should observe it cooperatively.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::DEFAULT_MAIN_AGENT;

/// Everything an executor needs to start one subagent.
#[derive(Clone, Debug)]
pub struct SpawnRequest {
    pub requester_session_key: String,
    pub task: String,
    pub label: Option<String>,
    pub agent_id: Option<String>,
    pub model: Option<String>,
    pub expects_completion_message: bool,
    /// Cancelled when the subagent is terminated or its parent stops.
    pub cancel: CancellationToken,
}

/// Identity of a subagent the executor accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnAccepted {
    pub run_id: String,
    pub child_session_key: String,
}

#[async_trait]
pub trait SpawnExecutor: Send + Sync {
    async fn spawn(&self, request: &SpawnRequest) -> anyhow::Result<SpawnAccepted>;
}

/// Agent id embedded in a session key of the form `agent:<id>:...`.
pub fn agent_id_from_session_key(session_key: &str) -> Option<&str> {
    let mut parts = session_key.split(':');
    match (parts.next(), parts.next()) {
        (Some("agent"), Some(id)) if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// Allocates identities for accepted subagents without running anything.
///
/// Execution is left to whoever watches the registry; they report progress
/// back through [`super::manager::SubagentOrchestrator::mark_started`] and
/// [`super::manager::SubagentOrchestrator::mark_ended`].
#[derive(Clone, Debug, Default)]
pub struct DetachedSpawnExecutor;

#[async_trait]
impl SpawnExecutor for DetachedSpawnExecutor {
    async fn spawn(&self, request: &SpawnRequest) -> anyhow::Result<SpawnAccepted> {
        if request.cancel.is_cancelled() {
            anyhow::bail!("parent run was stopped before the subagent could spawn");
        }
        let agent_id = request
            .agent_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .or_else(|| agent_id_from_session_key(&request.requester_session_key))
            .unwrap_or(DEFAULT_MAIN_AGENT);
        let id = Uuid::new_v4();
        Ok(SpawnAccepted {
            run_id: id.to_string(),
            child_session_key: format!("agent:{agent_id}:subagent:{id}"),
        })
    }
}
