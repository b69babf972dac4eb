//! Mutations over the `[secrets]` section of a configuration.
//!
//! Every mutation emits one audit line on the `audit` tracing target. Secret
//! values never appear in logs or in [`list`] output.

use serde::Serialize;

use super::{DEFAULT_SECRET_TARGETS, SecretEntry, SecretScope, SecretTarget, SecretsConfig};
use crate::error::SecretsError;

/// What `secrets list` reports for one entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSummary {
    pub key: String,
    pub scope: SecretScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub targets: Vec<SecretTarget>,
    pub allow_host_exec: bool,
    pub has_value: bool,
}

fn summarize(key: &str, entry: &SecretEntry, scope: SecretScope, agent_id: Option<&str>) -> SecretSummary {
    SecretSummary {
        key: key.to_string(),
        scope,
        agent_id: agent_id.map(str::to_string),
        targets: entry.effective_targets(),
        allow_host_exec: entry.allows_host_exec(),
        has_value: entry.trimmed_value().is_some(),
    }
}

fn clean_agent_id(agent_id: Option<&str>) -> Option<&str> {
    agent_id.map(str::trim).filter(|id| !id.is_empty())
}

/// App-scope entries, followed by the given agent's entries when an agent
/// id is supplied.
pub fn list(secrets: &SecretsConfig, agent_id: Option<&str>) -> Vec<SecretSummary> {
    let mut out: Vec<SecretSummary> = secrets
        .app
        .iter()
        .map(|(key, entry)| summarize(key, entry, SecretScope::App, None))
        .collect();

    if let Some(agent_id) = clean_agent_id(agent_id) {
        if let Some(entries) = secrets.agents.get(agent_id) {
            out.extend(
                entries
                    .iter()
                    .map(|(key, entry)| summarize(key, entry, SecretScope::Agent, Some(agent_id))),
            );
        }
    }
    out
}

/// Parameters for [`set`].
#[derive(Clone, Debug, Default)]
pub struct SetSecret {
    pub scope: SecretScope,
    pub agent_id: Option<String>,
    pub key: String,
    pub value: String,
    pub targets: Vec<SecretTarget>,
    pub allow_host_exec: bool,
}

/// Insert or replace a secret.
pub fn set(secrets: &mut SecretsConfig, params: SetSecret) -> Result<(), SecretsError> {
    let key = params.key.trim();
    if key.is_empty() {
        return Err(SecretsError::MissingKey);
    }
    let value = params.value.trim();
    if value.is_empty() {
        return Err(SecretsError::MissingValue);
    }
    let agent_id = clean_agent_id(params.agent_id.as_deref());
    if params.scope == SecretScope::Agent && agent_id.is_none() {
        return Err(SecretsError::MissingAgentId);
    }

    let mut targets: Vec<SecretTarget> = Vec::new();
    for target in params.targets {
        if target != SecretTarget::Unknown && !targets.contains(&target) {
            targets.push(target);
        }
    }
    if targets.is_empty() {
        targets = DEFAULT_SECRET_TARGETS.to_vec();
    }

    let entry = SecretEntry {
        value: Some(value.to_string()),
        targets: Some(targets),
        allow_host_exec: Some(params.allow_host_exec),
    };

    match (params.scope, agent_id) {
        (SecretScope::Agent, Some(agent_id)) => {
            secrets
                .agents
                .entry(agent_id.to_string())
                .or_default()
                .insert(key.to_string(), entry);
        }
        _ => {
            secrets.app.insert(key.to_string(), entry);
        }
    }

    tracing::info!(
        target: "audit",
        scope = %params.scope,
        agent = agent_id.unwrap_or(""),
        key,
        "secrets set"
    );
    Ok(())
}

/// Remove a secret. Removing a missing key is a no-op; returns whether
/// anything was removed.
pub fn delete(
    secrets: &mut SecretsConfig,
    scope: SecretScope,
    agent_id: Option<&str>,
    key: &str,
) -> bool {
    let key = key.trim();
    let agent_id = clean_agent_id(agent_id);
    let removed = match (scope, agent_id) {
        (SecretScope::App, _) => secrets.app.remove(key).is_some(),
        (SecretScope::Agent, Some(agent_id)) => secrets
            .agents
            .get_mut(agent_id)
            .is_some_and(|entries| entries.remove(key).is_some()),
        (SecretScope::Agent, None) => false,
    };

    tracing::info!(
        target: "audit",
        scope = %scope,
        agent = agent_id.unwrap_or(""),
        key,
        removed,
        "secrets delete"
    );
    removed
}

/// Enable or disable one target on an existing secret.
pub fn assign(
    secrets: &mut SecretsConfig,
    scope: SecretScope,
    agent_id: Option<&str>,
    key: &str,
    target: SecretTarget,
    enabled: bool,
) -> Result<(), SecretsError> {
    if target == SecretTarget::Unknown {
        return Err(SecretsError::InvalidTarget(target.to_string()));
    }
    let key = key.trim();
    let agent_id = clean_agent_id(agent_id);
    let holder = match (scope, agent_id) {
        (SecretScope::App, _) => Some(&mut secrets.app),
        (SecretScope::Agent, Some(agent_id)) => secrets.agents.get_mut(agent_id),
        (SecretScope::Agent, None) => None,
    };
    let entry = holder
        .and_then(|entries| entries.get_mut(key))
        .filter(|entry| entry.trimmed_value().is_some())
        .ok_or(SecretsError::NotFound)?;

    let mut targets = entry.effective_targets();
    if enabled {
        if !targets.contains(&target) {
            targets.push(target);
        }
    } else {
        targets.retain(|t| *t != target);
    }
    entry.targets = Some(targets);

    tracing::info!(
        target: "audit",
        scope = %scope,
        agent = agent_id.unwrap_or(""),
        key,
        secret_target = %target,
        enabled,
        "secrets assign"
    );
    Ok(())
}
