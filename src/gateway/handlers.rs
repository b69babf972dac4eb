//! Routes request frames to [`Gateway`] operations.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::protocol::*;
use super::{Gateway, SubagentAction};
use crate::orchestration::SpawnParams;
use crate::runtime::CreateRunParams;
use crate::secrets::store::SetSecret;
use crate::secrets::{ExecHost, SecretScope, SecretTarget};

type HandlerResult = Result<Value, ErrorShape>;

/// Deserialize method params. Missing params count as an empty object.
fn parse<T: DeserializeOwned>(params: Value) -> Result<T, ErrorShape> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params)
        .map_err(|e| ErrorShape::invalid_request(format!("invalid params: {e}")))
}

fn to_payload<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| {
        ErrorShape::new(ErrorCode::UpstreamFailure, format!("failed to encode payload: {e}"))
    })
}

fn scope(value: Option<&str>) -> SecretScope {
    // Infallible: anything but "agent" is app scope.
    value.and_then(|s| s.parse().ok()).unwrap_or_default()
}

fn target(value: &str) -> Result<SecretTarget, ErrorShape> {
    value
        .parse()
        .map_err(|e: crate::error::SecretsError| ErrorShape::invalid_request(e.to_string()))
}

/// Handle one request frame. Never fails: every error becomes an error frame.
pub async fn dispatch(gateway: &Gateway, frame: RequestFrame) -> ResponseFrame {
    let RequestFrame { id, method, params } = frame;
    tracing::debug!(method = %method, "Gateway request");

    let result = match method.as_str() {
        "app.create" => app_create(gateway, params),
        "app.start" => app_start(gateway, params),
        "app.stop" => app_stop(gateway, params),
        "app.status" => app_status(gateway, params),
        "app.spawn" => app_spawn(gateway, params).await,
        "app.subagents" => app_subagents(gateway, params),
        "subagents.graph" => subagents_graph(gateway, params),
        "subagents.action" => subagents_action(gateway, params).await,
        "secrets.list" => secrets_list(gateway, params),
        "secrets.set" => secrets_set(gateway, params),
        "secrets.delete" => secrets_delete(gateway, params),
        "secrets.assign" => secrets_assign(gateway, params),
        "secrets.env" => secrets_env(gateway, params),
        other => Err(ErrorShape::invalid_request(format!("unknown method: {other}"))),
    };

    match result {
        Ok(payload) => ResponseFrame::success(id, payload),
        Err(error) => {
            tracing::debug!(method = %method, code = ?error.code, message = %error.message, "Gateway request failed");
            ResponseFrame::failure(id, error)
        }
    }
}

/// Parse a raw line and dispatch it. Unparsable frames get an
/// `INVALID_REQUEST` response with a null id.
pub async fn handle_line(gateway: &Gateway, line: &str) -> ResponseFrame {
    match serde_json::from_str::<RequestFrame>(line) {
        Ok(frame) => dispatch(gateway, frame).await,
        Err(e) => ResponseFrame::failure(
            Value::Null,
            ErrorShape::invalid_request(format!("malformed request frame: {e}")),
        ),
    }
}

// ===== app.* =====

fn app_create(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: AppCreateParams = parse(params)?;
    let run = gateway.create_run(CreateRunParams {
        run_id: p.run_id,
        session_key: p.session_key,
        agent_id: p.agent_id,
        workspace_dir: p
            .workspace_dir
            .filter(|d| !d.trim().is_empty())
            .map(Into::into),
    })?;
    to_payload(&run)
}

fn app_start(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: RunIdParams = parse(params)?;
    to_payload(&gateway.start_run(&p.run_id)?)
}

fn app_stop(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: AppStopParams = parse(params)?;
    to_payload(&gateway.stop_run(&p.run_id, p.reason.as_deref())?)
}

fn app_status(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: AppStatusParams = parse(params)?;
    let runs = gateway.status(p.run_id.as_deref());
    Ok(json!({ "runs": runs }))
}

async fn app_spawn(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: AppSpawnParams = parse(params)?;
    let result = gateway
        .spawn_subagent(
            &p.run_id,
            SpawnParams {
                task: p.task,
                label: p.label,
                agent_id: p.agent_id,
                model: p.model,
                expects_completion_message: false,
            },
        )
        .await?;
    to_payload(&result)
}

fn app_subagents(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: RunIdParams = parse(params)?;
    Ok(json!({ "runs": gateway.list_subagents(&p.run_id) }))
}

// ===== subagents.* =====

fn subagents_graph(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: GraphParams = parse(params)?;
    to_payload(&gateway.subagent_graph(p.session_key.as_deref())?)
}

async fn subagents_action(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: ActionParams = parse(params)?;
    let result = gateway
        .subagent_action(SubagentAction {
            session_key: p.session_key,
            action: p.action,
            target: p.target,
            message: p.message,
        })
        .await?;
    to_payload(&result)
}

// ===== secrets.* =====

fn secrets_list(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: SecretsListParams = parse(params)?;
    Ok(json!({ "secrets": gateway.secrets_list(p.agent_id.as_deref())? }))
}

fn secrets_set(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: SecretsSetParams = parse(params)?;
    gateway.secrets_set(SetSecret {
        scope: scope(p.scope.as_deref()),
        agent_id: p.agent_id,
        key: p.key,
        value: p.value,
        targets: p.targets,
        allow_host_exec: p.allow_host_exec,
    })?;
    Ok(json!({ "ok": true }))
}

fn secrets_delete(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: SecretsDeleteParams = parse(params)?;
    let removed = gateway.secrets_delete(scope(p.scope.as_deref()), p.agent_id.as_deref(), &p.key)?;
    Ok(json!({ "ok": true, "removed": removed }))
}

fn secrets_assign(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: SecretsAssignParams = parse(params)?;
    gateway.secrets_assign(
        scope(p.scope.as_deref()),
        p.agent_id.as_deref(),
        &p.key,
        target(&p.target)?,
        p.enabled,
    )?;
    Ok(json!({ "ok": true }))
}

fn secrets_env(gateway: &Gateway, params: Value) -> HandlerResult {
    let p: SecretsEnvParams = parse(params)?;
    let host = match p.host.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        Some(host) => Some(host.parse::<ExecHost>().map_err(|e| ErrorShape::invalid_request(e))?),
        None => None,
    };
    let env = gateway.secrets_env(p.agent_id.as_deref(), target(&p.target)?, host)?;
    to_payload(&env)
}
