//! The orchestration façade and its transport.
//!
//! [`Gateway`] is the operation set protocol handlers call: app-run
//! lifecycle, subagent spawning and reporting, operator actions, and secret
//! management. It owns no transport; [`handlers::dispatch`] maps JSON
//! request frames onto it and [`serve`] runs the line-oriented server.

pub mod handlers;
pub mod messenger;
pub mod protocol;
pub mod serve;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigSource;
use crate::error::{ConfigError, OrchestrationError};
use crate::orchestration::executor::{DetachedSpawnExecutor, SpawnExecutor};
use crate::orchestration::graph::{SubagentGraph, build_graph};
use crate::orchestration::{SpawnParams, SpawnResult, SubagentOrchestrator, SubagentRun, now_ms};
use crate::runtime::{
    AppRun, BuiltinToolCatalog, CreateRunParams, ProfileSandboxResolver, RunRegistry,
    SandboxResolver, ToolCatalog,
};
use crate::secrets::resolver::{SecretEnv, resolve_env};
use crate::secrets::store::{self, SecretSummary, SetSecret};
use crate::secrets::{ExecHost, SecretScope, SecretTarget};
use messenger::{InboxMessenger, SessionMessenger};

/// Session-key alias for the configured primary session.
pub const MAIN_SESSION_ALIAS: &str = "main";

/// Reason recorded on subagents ended by a `kill` action.
pub const KILL_REASON: &str = "killed";

/// Operator actions on subagents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentActionKind {
    Kill,
    Steer,
    Message,
}

impl SubagentActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubagentActionKind::Kill => "kill",
            SubagentActionKind::Steer => "steer",
            SubagentActionKind::Message => "message",
        }
    }
}

impl fmt::Display for SubagentActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubagentActionKind {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "kill" => Ok(SubagentActionKind::Kill),
            "steer" => Ok(SubagentActionKind::Steer),
            "message" => Ok(SubagentActionKind::Message),
            "" => Err(OrchestrationError::InvalidRequest("action required".into())),
            other => Err(OrchestrationError::InvalidRequest(format!(
                "unsupported action: {other}"
            ))),
        }
    }
}

/// A `subagents.action` request before validation.
#[derive(Clone, Debug, Default)]
pub struct SubagentAction {
    pub session_key: Option<String>,
    pub action: String,
    pub target: Option<String>,
    pub message: Option<String>,
}

/// What an operator action did. `ok` is false when the target matched no
/// active subagent.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionResult {
    pub ok: bool,
    pub action: SubagentActionKind,
    pub result: Value,
}

fn required(value: Option<&str>, what: &str) -> Result<String, OrchestrationError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| OrchestrationError::InvalidRequest(format!("{what} required")))
}

/// Builds a [`Gateway`], defaulting every collaborator it is not given.
pub struct GatewayBuilder {
    config: Arc<dyn ConfigSource>,
    executor: Arc<dyn SpawnExecutor>,
    messenger: Arc<dyn SessionMessenger>,
    sandbox: Arc<dyn SandboxResolver>,
    tools: Arc<dyn ToolCatalog>,
    cancel_token: CancellationToken,
}

impl GatewayBuilder {
    pub fn with_executor(mut self, executor: Arc<dyn SpawnExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn SessionMessenger>) -> Self {
        self.messenger = messenger;
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn SandboxResolver>) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolCatalog>) -> Self {
        self.tools = tools;
        self
    }

    /// Root token every run and subagent token derives from.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn build(self) -> Gateway {
        let subagents = SubagentOrchestrator::new(self.executor, self.cancel_token.clone());
        let runs = RunRegistry::new(
            subagents,
            Arc::clone(&self.config),
            self.sandbox,
            self.tools,
            self.cancel_token,
        );
        Gateway {
            runs,
            config: self.config,
            messenger: self.messenger,
        }
    }
}

/// The orchestration façade. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Gateway {
    runs: RunRegistry,
    config: Arc<dyn ConfigSource>,
    messenger: Arc<dyn SessionMessenger>,
}

impl Gateway {
    pub fn builder(config: Arc<dyn ConfigSource>) -> GatewayBuilder {
        GatewayBuilder {
            config,
            executor: Arc::new(DetachedSpawnExecutor),
            messenger: Arc::new(InboxMessenger::new()),
            sandbox: Arc::new(ProfileSandboxResolver),
            tools: Arc::new(BuiltinToolCatalog),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    pub fn subagents(&self) -> &SubagentOrchestrator {
        self.runs.subagents()
    }

    /// Map an optional session key onto a concrete one: blank means the
    /// primary session, and so does the `main` alias.
    pub fn resolve_session_key(&self, session_key: Option<&str>) -> Result<String, ConfigError> {
        match session_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) if key != MAIN_SESSION_ALIAS => Ok(key.to_string()),
            _ => Ok(self.config.load()?.main_session),
        }
    }

    // ----- app runs -----

    pub fn create_run(&self, params: CreateRunParams) -> Result<AppRun, OrchestrationError> {
        Ok(self.runs.create(params)?)
    }

    pub fn start_run(&self, run_id: &str) -> Result<AppRun, OrchestrationError> {
        self.runs.start(run_id.trim())
    }

    pub fn stop_run(&self, run_id: &str, reason: Option<&str>) -> Result<AppRun, OrchestrationError> {
        self.runs.stop(run_id.trim(), reason)
    }

    /// One run when an id is given (empty if unknown), otherwise every run.
    pub fn status(&self, run_id: Option<&str>) -> Vec<AppRun> {
        match run_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self.runs.status(id).into_iter().collect(),
            None => self.runs.list(),
        }
    }

    /// Spawn a subagent for a run.
    ///
    /// Only an accepted spawn is `Ok`; a cap rejection becomes
    /// [`OrchestrationError::Forbidden`] and an executor failure
    /// [`OrchestrationError::Upstream`]. A run stopped before or during the
    /// spawn yields [`OrchestrationError::InvalidRequest`].
    pub async fn spawn_subagent(
        &self,
        run_id: &str,
        mut params: SpawnParams,
    ) -> Result<SpawnResult, OrchestrationError> {
        params.task = required(Some(params.task.as_str()), "task")?;
        match self.runs.spawn(run_id.trim(), params).await? {
            accepted @ SpawnResult::Accepted { .. } => Ok(accepted),
            SpawnResult::Forbidden { active, cap, .. } => {
                Err(OrchestrationError::Forbidden { active, cap })
            }
            SpawnResult::Error { error } => Err(OrchestrationError::Upstream(error)),
        }
    }

    pub fn list_subagents(&self, run_id: &str) -> Vec<SubagentRun> {
        self.runs.subagent_runs(run_id.trim())
    }

    pub fn subagent_graph(&self, session_key: Option<&str>) -> Result<SubagentGraph, OrchestrationError> {
        let root = self.resolve_session_key(session_key)?;
        let runs = self.subagents().list_descendants(&root);
        Ok(build_graph(&root, &runs, now_ms()))
    }

    /// Validate and apply an operator action under a session.
    pub async fn subagent_action(&self, request: SubagentAction) -> Result<ActionResult, OrchestrationError> {
        let action: SubagentActionKind = request.action.parse()?;
        let session_key = self.resolve_session_key(request.session_key.as_deref())?;
        let target = required(request.target.as_deref(), "target")?;

        match action {
            SubagentActionKind::Kill => {
                let killed = self.subagents().kill(&session_key, &target, KILL_REASON);
                let run_ids: Vec<&str> = killed.iter().map(|r| r.run_id.as_str()).collect();
                Ok(ActionResult {
                    ok: !killed.is_empty(),
                    action,
                    result: json!({ "killed": killed.len(), "runIds": run_ids }),
                })
            }
            SubagentActionKind::Steer => {
                let message = required(request.message.as_deref(), "message")?;
                let matched = self.subagents().find_active(&session_key, &target);
                // Every target is attempted; one failed delivery does not
                // hide the ones that already landed.
                let mut deliveries = Vec::with_capacity(matched.len());
                let mut steered = 0;
                for run in &matched {
                    match self.messenger.send(&run.child_session_key, &message).await {
                        Ok(receipt) => {
                            steered += 1;
                            deliveries.push(json!({ "runId": run.run_id, "ok": true, "receipt": receipt }));
                        }
                        Err(e) => {
                            tracing::warn!(run_id = %run.run_id, error = %e, "Steer delivery failed");
                            deliveries.push(json!({ "runId": run.run_id, "ok": false, "error": format!("{e:#}") }));
                        }
                    }
                }
                tracing::info!(session_key = %session_key, target = %target, steered, failed = deliveries.len() - steered, "Subagents steered");
                Ok(ActionResult {
                    ok: steered > 0,
                    action,
                    result: json!({ "steered": steered, "deliveries": deliveries }),
                })
            }
            SubagentActionKind::Message => {
                let message = required(request.message.as_deref(), "message")?;
                let to = self.resolve_session_key(Some(target.as_str()))?;
                let receipt = self
                    .messenger
                    .send(&to, &message)
                    .await
                    .map_err(|e| OrchestrationError::Upstream(format!("{e:#}")))?;
                tracing::info!(from = %session_key, to = %to, "Session message sent");
                Ok(ActionResult {
                    ok: true,
                    action,
                    result: json!({ "sessionKey": to, "receipt": receipt }),
                })
            }
        }
    }

    // ----- secrets -----

    /// Effective secrets across every config layer; values are never included.
    pub fn secrets_list(&self, agent_id: Option<&str>) -> Result<Vec<SecretSummary>, OrchestrationError> {
        let config = self.config.load()?;
        Ok(store::list(&config.secrets, agent_id))
    }

    pub fn secrets_set(&self, params: SetSecret) -> Result<(), OrchestrationError> {
        let mut secrets = self.config.editable_secrets()?;
        store::set(&mut secrets, params)?;
        self.config.save_secrets(&secrets)?;
        Ok(())
    }

    /// Returns whether anything was removed.
    pub fn secrets_delete(
        &self,
        scope: SecretScope,
        agent_id: Option<&str>,
        key: &str,
    ) -> Result<bool, OrchestrationError> {
        let mut secrets = self.config.editable_secrets()?;
        let removed = store::delete(&mut secrets, scope, agent_id, key);
        if removed {
            self.config.save_secrets(&secrets)?;
        }
        Ok(removed)
    }

    pub fn secrets_assign(
        &self,
        scope: SecretScope,
        agent_id: Option<&str>,
        key: &str,
        target: SecretTarget,
        enabled: bool,
    ) -> Result<(), OrchestrationError> {
        let mut secrets = self.config.editable_secrets()?;
        store::assign(&mut secrets, scope, agent_id, key, target, enabled)?;
        self.config.save_secrets(&secrets)?;
        Ok(())
    }

    pub fn secrets_env(
        &self,
        agent_id: Option<&str>,
        target: SecretTarget,
        host: Option<ExecHost>,
    ) -> Result<SecretEnv, OrchestrationError> {
        let config = self.config.load()?;
        Ok(resolve_env(&config.secrets, agent_id, target, host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, StaticConfigSource};
    use crate::orchestration::executor::{SpawnAccepted, SpawnRequest};

    fn test_gateway() -> (Gateway, Arc<InboxMessenger>) {
        let messenger = Arc::new(InboxMessenger::new());
        let gateway = Gateway::builder(Arc::new(StaticConfigSource::new(AppConfig::default())))
            .with_messenger(messenger.clone())
            .build();
        (gateway, messenger)
    }

    fn task(task: &str) -> SpawnParams {
        SpawnParams {
            task: task.into(),
            label: Some(task.into()),
            ..Default::default()
        }
    }

    #[test]
    fn main_alias_resolves_to_primary_session() {
        let (gateway, _) = test_gateway();
        assert_eq!(gateway.resolve_session_key(None).unwrap(), "agent:main");
        assert_eq!(gateway.resolve_session_key(Some(" ")).unwrap(), "agent:main");
        assert_eq!(gateway.resolve_session_key(Some("main")).unwrap(), "agent:main");
        assert_eq!(gateway.resolve_session_key(Some("agent:x")).unwrap(), "agent:x");
    }

    #[test]
    fn status_of_unknown_run_is_empty() {
        let (gateway, _) = test_gateway();
        gateway.create_run(CreateRunParams::default()).unwrap();
        assert!(gateway.status(Some("ghost")).is_empty());
        assert_eq!(gateway.status(None).len(), 1);
    }

    #[tokio::test]
    async fn blank_task_is_invalid() {
        let (gateway, _) = test_gateway();
        let run = gateway.create_run(CreateRunParams::default()).unwrap();
        let err = gateway.spawn_subagent(&run.run_id, task("  ")).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn actions_validate_required_fields() {
        let (gateway, _) = test_gateway();
        let unsupported = gateway
            .subagent_action(SubagentAction {
                action: "pause".into(),
                target: Some("all".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(unsupported, Err(OrchestrationError::InvalidRequest(_))));

        let no_target = gateway
            .subagent_action(SubagentAction {
                action: "kill".into(),
                ..Default::default()
            })
            .await;
        assert!(matches!(no_target, Err(OrchestrationError::InvalidRequest(_))));

        let no_message = gateway
            .subagent_action(SubagentAction {
                action: "steer".into(),
                target: Some("all".into()),
                message: Some("   ".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(no_message, Err(OrchestrationError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn steer_delivers_to_child_sessions() {
        let (gateway, messenger) = test_gateway();
        let run = gateway.create_run(CreateRunParams::default()).unwrap();
        let accepted = gateway.spawn_subagent(&run.run_id, task("scout")).await.unwrap();
        let SpawnResult::Accepted { child_session_key, .. } = accepted else {
            panic!("expected accepted spawn");
        };

        let result = gateway
            .subagent_action(SubagentAction {
                session_key: Some("main".into()),
                action: "steer".into(),
                target: Some("scout".into()),
                message: Some("focus on tests".into()),
            })
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.result["steered"], 1);
        assert_eq!(messenger.pending(&child_session_key), 1);
    }

    #[tokio::test]
    async fn steer_reports_each_delivery() {
        struct Picky;
        #[async_trait::async_trait]
        impl SessionMessenger for Picky {
            async fn send(&self, session_key: &str, _message: &str) -> anyhow::Result<Value> {
                if session_key.ends_with(":bad") {
                    anyhow::bail!("session offline");
                }
                Ok(json!({ "sessionKey": session_key }))
            }
        }
        struct Named;
        #[async_trait::async_trait]
        impl SpawnExecutor for Named {
            async fn spawn(&self, request: &SpawnRequest) -> anyhow::Result<SpawnAccepted> {
                Ok(SpawnAccepted {
                    run_id: request.task.clone(),
                    child_session_key: format!("agent:main:{}", request.task),
                })
            }
        }

        let gateway = Gateway::builder(Arc::new(StaticConfigSource::new(AppConfig::default())))
            .with_executor(Arc::new(Named))
            .with_messenger(Arc::new(Picky))
            .build();
        let run = gateway.create_run(CreateRunParams::default()).unwrap();
        for name in ["bad", "good"] {
            gateway.spawn_subagent(&run.run_id, task(name)).await.unwrap();
        }

        let result = gateway
            .subagent_action(SubagentAction {
                action: "steer".into(),
                target: Some("all".into()),
                message: Some("wrap up".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.result["steered"], 1);
        let deliveries = result.result["deliveries"].as_array().unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0]["runId"], "bad");
        assert_eq!(deliveries[0]["ok"], false);
        assert_eq!(deliveries[0]["error"], "session offline");
        assert_eq!(deliveries[1]["runId"], "good");
        assert_eq!(deliveries[1]["ok"], true);
    }

    #[tokio::test]
    async fn kill_ends_matching_subagent() {
        let (gateway, _) = test_gateway();
        let run = gateway.create_run(CreateRunParams::default()).unwrap();
        gateway.spawn_subagent(&run.run_id, task("a")).await.unwrap();
        gateway.spawn_subagent(&run.run_id, task("b")).await.unwrap();

        let result = gateway
            .subagent_action(SubagentAction {
                action: "kill".into(),
                target: Some("a".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.result["killed"], 1);
        assert_eq!(gateway.subagents().count_active("agent:main"), 1);

        let missed = gateway
            .subagent_action(SubagentAction {
                action: "kill".into(),
                target: Some("a".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!missed.ok);
    }

    #[tokio::test]
    async fn message_goes_to_target_session() {
        let (gateway, messenger) = test_gateway();
        gateway
            .subagent_action(SubagentAction {
                action: "message".into(),
                target: Some("agent:ops".into()),
                message: Some("ping".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(messenger.pending("agent:ops"), 1);
    }

    #[test]
    fn secrets_round_trip_through_config_source() {
        let (gateway, _) = test_gateway();
        gateway
            .secrets_set(SetSecret {
                key: "API_TOKEN".into(),
                value: "t0k".into(),
                targets: vec![SecretTarget::Exec],
                ..Default::default()
            })
            .unwrap();

        let listed = gateway.secrets_list(None).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].has_value);

        let env = gateway
            .secrets_env(None, SecretTarget::Exec, Some(ExecHost::Sandbox))
            .unwrap();
        assert_eq!(env.env.get("API_TOKEN").map(String::as_str), Some("t0k"));

        assert!(gateway.secrets_delete(SecretScope::App, None, "API_TOKEN").unwrap());
        assert!(!gateway.secrets_delete(SecretScope::App, None, "API_TOKEN").unwrap());
        assert!(gateway.secrets_list(None).unwrap().is_empty());
    }
}
