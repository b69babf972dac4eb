//! In-memory store of app runs.
//!
//! [`RunRegistry`] exclusively owns every [`AppRun`] record and hands out
//! clones. Records live for the lifetime of the process; there is no delete.
//!
//! Lock order is always runs → subagents: the registry may call into the
//! [`SubagentOrchestrator`] while holding its own lock, never the reverse.
//! The lock is released before any `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::run::{AppRun, AppRunState, CreateRunParams};
use super::sandbox::SandboxResolver;
use super::tools::{ToolCatalog, available_tools};
use crate::config::{ConfigSource, SubagentRouting};
use crate::error::{ConfigError, OrchestrationError};
use crate::orchestration::{SpawnParams, SpawnResult, SubagentOrchestrator, SubagentRun, now_ms};

/// Reason recorded on subagents terminated by a run stop without a reason.
pub const DEFAULT_STOP_REASON: &str = "app-stop";

/// Reason recorded on subagents of a run replaced by a create with its id.
pub const REPLACED_REASON: &str = "app-replaced";

struct RunEntry {
    record: AppRun,
    /// Triggered on stop; parent of every subagent token spawned by the run.
    stop_token: CancellationToken,
}

#[derive(Default)]
struct Runs {
    entries: HashMap<String, RunEntry>,
    /// Run ids in creation order.
    order: Vec<String>,
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Registry of app runs and the collaborators used to create them.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct RunRegistry {
    runs: Arc<Mutex<Runs>>,
    subagents: SubagentOrchestrator,
    config: Arc<dyn ConfigSource>,
    sandbox: Arc<dyn SandboxResolver>,
    tools: Arc<dyn ToolCatalog>,
    root_cancel_token: CancellationToken,
}

impl RunRegistry {
    pub fn new(
        subagents: SubagentOrchestrator,
        config: Arc<dyn ConfigSource>,
        sandbox: Arc<dyn SandboxResolver>,
        tools: Arc<dyn ToolCatalog>,
        root_cancel_token: CancellationToken,
    ) -> Self {
        Self {
            runs: Arc::new(Mutex::new(Runs::default())),
            subagents,
            config,
            sandbox,
            tools,
            root_cancel_token,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subagents(&self) -> &SubagentOrchestrator {
        &self.subagents
    }

    /// Create a run in state `created`.
    ///
    /// A caller-supplied run id is trusted verbatim (after trimming). Creating
    /// over an existing id replaces that run: its token is cancelled and its
    /// active subagents are terminated.
    pub fn create(&self, params: CreateRunParams) -> Result<AppRun, ConfigError> {
        let config = self.config.load()?;

        let run_id = clean(params.run_id.as_deref())
            .unwrap_or_else(|| format!("app-{}", Uuid::new_v4()));
        let session_key =
            clean(params.session_key.as_deref()).unwrap_or_else(|| config.main_session.clone());
        let agent_id =
            clean(params.agent_id.as_deref()).unwrap_or_else(|| config.main_agent.clone());

        let sandbox = self
            .sandbox
            .resolve(&config, &session_key, params.workspace_dir.as_deref());
        let tool_names = available_tools(
            self.tools.as_ref(),
            &session_key,
            sandbox.as_ref(),
            &config.app.tools,
        );

        let record = AppRun {
            run_id: run_id.clone(),
            session_key: session_key.clone(),
            agent_id,
            created_at: now_ms(),
            started_at: None,
            stopped_at: None,
            state: AppRunState::Created,
            config: config.app,
            sandboxed: sandbox.is_some(),
            tool_names,
            active_subagents: self.subagents.count_active(&session_key),
            last_spawn: None,
        };

        let mut runs = self.lock();
        let entry = RunEntry {
            record: record.clone(),
            stop_token: self.root_cancel_token.child_token(),
        };
        if let Some(replaced) = runs.entries.insert(run_id.clone(), entry) {
            replaced.stop_token.cancel();
            let terminated = self
                .subagents
                .terminate(&replaced.record.session_key, REPLACED_REASON);
            runs.order.retain(|id| id != &run_id);
            tracing::warn!(run_id = %run_id, terminated, "Replaced existing app run with the same id");
        }
        runs.order.push(run_id.clone());

        tracing::info!(
            run_id = %run_id,
            session_key = %session_key,
            sandboxed = record.sandboxed,
            tools = record.tool_names.len(),
            "App run created"
        );
        Ok(record)
    }

    /// Move a created run to `running`. Idempotent for running runs; a
    /// stopped run stays stopped. Always refreshes the active subagent count.
    pub fn start(&self, run_id: &str) -> Result<AppRun, OrchestrationError> {
        let mut runs = self.lock();
        let entry = runs
            .entries
            .get_mut(run_id)
            .ok_or_else(|| not_found(run_id))?;

        match entry.record.state {
            AppRunState::Created => {
                entry.record.state = AppRunState::Running;
                entry.record.started_at = Some(now_ms());
                tracing::info!(run_id, "App run started");
            }
            AppRunState::Running => {}
            AppRunState::Stopped => {
                tracing::debug!(run_id, "Ignoring start of a stopped app run");
            }
        }
        entry.record.active_subagents = self.subagents.count_active(&entry.record.session_key);
        Ok(entry.record.clone())
    }

    /// Stop a run, whatever its state.
    ///
    /// Cancels the run's token and terminates every active subagent under
    /// its session before returning. Re-stopping refreshes `stopped_at`.
    pub fn stop(&self, run_id: &str, reason: Option<&str>) -> Result<AppRun, OrchestrationError> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_STOP_REASON);

        let mut runs = self.lock();
        let entry = runs
            .entries
            .get_mut(run_id)
            .ok_or_else(|| not_found(run_id))?;

        entry.stop_token.cancel();
        let terminated = self.subagents.terminate(&entry.record.session_key, reason);
        entry.record.active_subagents = self.subagents.count_active(&entry.record.session_key);
        entry.record.state = AppRunState::Stopped;
        entry.record.stopped_at = Some(now_ms());

        tracing::info!(run_id, reason, terminated, "App run stopped");
        Ok(entry.record.clone())
    }

    /// Refresh and return one run.
    pub fn status(&self, run_id: &str) -> Result<AppRun, OrchestrationError> {
        let mut runs = self.lock();
        let entry = runs
            .entries
            .get_mut(run_id)
            .ok_or_else(|| not_found(run_id))?;
        entry.record.active_subagents = self.subagents.count_active(&entry.record.session_key);
        Ok(entry.record.clone())
    }

    /// Refresh and return every run, in creation order.
    pub fn list(&self) -> Vec<AppRun> {
        let mut runs = self.lock();
        let Runs { entries, order } = &mut *runs;
        let mut out = Vec::with_capacity(order.len());
        for id in order.iter() {
            if let Some(entry) = entries.get_mut(id) {
                entry.record.active_subagents =
                    self.subagents.count_active(&entry.record.session_key);
                out.push(entry.record.clone());
            }
        }
        out
    }

    /// Spawn a subagent under the run's session, capped by the run's
    /// configuration snapshot.
    ///
    /// Admission rejections and executor failures come back as
    /// [`SpawnResult`] variants and are also kept as the run's `last_spawn`.
    /// A spawn overtaken by a stop of the run is rejected like a spawn on a
    /// stopped run.
    pub async fn spawn(
        &self,
        run_id: &str,
        mut params: SpawnParams,
    ) -> Result<SpawnResult, OrchestrationError> {
        let (session_key, cap, token) = {
            let runs = self.lock();
            let entry = runs.entries.get(run_id).ok_or_else(|| not_found(run_id))?;
            if entry.record.state == AppRunState::Stopped {
                return Err(stopped(run_id));
            }
            params.expects_completion_message =
                entry.record.config.subagents.routing == SubagentRouting::Requester;
            (
                entry.record.session_key.clone(),
                entry.record.config.subagents.max_active_runs,
                entry.stop_token.clone(),
            )
        };

        let result = self
            .subagents
            .try_spawn(&session_key, params, cap, Some(&token))
            .await;

        let mut runs = self.lock();
        if let Some(entry) = runs.entries.get_mut(run_id) {
            entry.record.last_spawn = Some(result.clone());
            entry.record.active_subagents = self.subagents.count_active(&session_key);
            if entry.record.state == AppRunState::Stopped && !result.is_accepted() {
                return Err(stopped(run_id));
            }
        }
        Ok(result)
    }

    /// Every subagent run under the run's session. Empty for unknown runs.
    pub fn subagent_runs(&self, run_id: &str) -> Vec<SubagentRun> {
        let session_key = {
            let runs = self.lock();
            match runs.entries.get(run_id) {
                Some(entry) => entry.record.session_key.clone(),
                None => return Vec::new(),
            }
        };
        self.subagents.list_descendants(&session_key)
    }

    /// The run's cancellation token, for collaborators that want to observe
    /// a stop cooperatively.
    pub fn cancel_token(&self, run_id: &str) -> Option<CancellationToken> {
        self.lock()
            .entries
            .get(run_id)
            .map(|entry| entry.stop_token.clone())
    }
}

fn not_found(run_id: &str) -> OrchestrationError {
    OrchestrationError::NotFound {
        run_id: run_id.to_string(),
    }
}

fn stopped(run_id: &str) -> OrchestrationError {
    OrchestrationError::InvalidRequest(format!("app run is stopped: {run_id}"))
}
