//! Resolution of scoped secrets into what one execution target may see.
//!
//! App-scope and agent-scope secrets are additive: the same key in both
//! scopes yields two [`ResolvedSecret`]s. [`resolve_env`] is the only place
//! that decides whether host-level `exec` may inherit a credential.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{ExecHost, SecretEntry, SecretScope, SecretTarget, SecretsConfig};

/// A secret with a real value, ready to be injected somewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSecret {
    pub key: String,
    pub value: String,
    pub scope: SecretScope,
    pub targets: Vec<SecretTarget>,
    pub allow_host_exec: bool,
}

/// Environment handed to one execution target.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SecretEnv {
    pub env: BTreeMap<String, String>,
    /// Scopes that contributed at least one entry, in first-contribution order.
    pub scopes: Vec<SecretScope>,
}

fn resolve_entry(key: &str, entry: &SecretEntry, scope: SecretScope) -> Option<ResolvedSecret> {
    let value = entry.trimmed_value()?;
    Some(ResolvedSecret {
        key: key.to_string(),
        value: value.to_string(),
        scope,
        targets: entry.effective_targets(),
        allow_host_exec: entry.allows_host_exec(),
    })
}

/// All secrets with a value: app scope first, then the agent's own.
pub fn resolve(secrets: &SecretsConfig, agent_id: Option<&str>) -> Vec<ResolvedSecret> {
    let app = secrets
        .app
        .iter()
        .filter_map(|(key, entry)| resolve_entry(key, entry, SecretScope::App));

    let agent_entries = agent_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .and_then(|id| secrets.agents.get(id));
    let agent = agent_entries
        .into_iter()
        .flatten()
        .filter_map(|(key, entry)| resolve_entry(key, entry, SecretScope::Agent));

    app.chain(agent).collect()
}

/// Flatten the secrets visible to `target` into an environment map.
///
/// For [`SecretTarget::Exec`], a secret is only visible when the command runs
/// inside the sandbox or the secret opts in with `allow_host_exec`.
pub fn resolve_env(
    secrets: &SecretsConfig,
    agent_id: Option<&str>,
    target: SecretTarget,
    host: Option<ExecHost>,
) -> SecretEnv {
    let mut out = SecretEnv::default();
    for secret in resolve(secrets, agent_id) {
        if !secret.targets.contains(&target) {
            continue;
        }
        if target == SecretTarget::Exec
            && host != Some(ExecHost::Sandbox)
            && !secret.allow_host_exec
        {
            continue;
        }
        out.env.insert(secret.key, secret.value);
        if !out.scopes.contains(&secret.scope) {
            out.scopes.push(secret.scope);
        }
    }
    out
}
