//! Scoped secrets: credentials that are visible app-wide or to one agent,
//! gated per execution target.
//!
//! [`resolver`] computes what a given target may see; [`store`] mutates the
//! secrets section of a configuration. Both work on plain [`SecretsConfig`]
//! values and hold no state of their own.

pub mod resolver;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SecretsError;

/// Execution surface a secret may be injected into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretTarget {
    Sandbox,
    Skills,
    Exec,
    /// Any target name this build does not know. Dropped during resolution.
    #[serde(other)]
    Unknown,
}

/// Targets applied when a secret does not list any.
pub const DEFAULT_SECRET_TARGETS: [SecretTarget; 2] = [SecretTarget::Sandbox, SecretTarget::Skills];

impl SecretTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretTarget::Sandbox => "sandbox",
            SecretTarget::Skills => "skills",
            SecretTarget::Exec => "exec",
            SecretTarget::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SecretTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretTarget {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sandbox" => Ok(SecretTarget::Sandbox),
            "skills" => Ok(SecretTarget::Skills),
            "exec" => Ok(SecretTarget::Exec),
            other => Err(SecretsError::InvalidTarget(other.to_string())),
        }
    }
}

/// Whether a secret applies to the whole app or to a single agent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretScope {
    #[default]
    App,
    Agent,
}

impl SecretScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretScope::App => "app",
            SecretScope::Agent => "agent",
        }
    }
}

impl fmt::Display for SecretScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretScope {
    type Err = SecretsError;

    /// Anything other than `agent` is treated as app scope.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.trim() == "agent" {
            SecretScope::Agent
        } else {
            SecretScope::App
        })
    }
}

/// Where a command is going to execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecHost {
    Sandbox,
    Gateway,
    Node,
}

impl FromStr for ExecHost {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sandbox" => Ok(ExecHost::Sandbox),
            "gateway" => Ok(ExecHost::Gateway),
            "node" => Ok(ExecHost::Node),
            other => Err(format!("invalid host: {other}")),
        }
    }
}

/// One secret as written in configuration. Every field is optional so that
/// partially filled entries survive a load/save cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<SecretTarget>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_host_exec: Option<bool>,
}

impl SecretEntry {
    /// Targets with the default applied and unknown names dropped.
    pub fn effective_targets(&self) -> Vec<SecretTarget> {
        let listed = self.targets.as_deref().unwrap_or_default();
        let source: &[SecretTarget] = if listed.is_empty() {
            &DEFAULT_SECRET_TARGETS
        } else {
            listed
        };
        source
            .iter()
            .copied()
            .filter(|t| *t != SecretTarget::Unknown)
            .collect()
    }

    pub fn allows_host_exec(&self) -> bool {
        self.allow_host_exec == Some(true)
    }

    /// The trimmed value, or `None` when it is missing or blank.
    pub fn trimmed_value(&self) -> Option<&str> {
        self.value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// The `[secrets]` section: app-wide entries plus per-agent maps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub app: BTreeMap<String, SecretEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agents: BTreeMap<String, BTreeMap<String, SecretEntry>>,
}

impl SecretsConfig {
    pub fn is_empty(&self) -> bool {
        self.app.is_empty() && self.agents.values().all(BTreeMap::is_empty)
    }

    /// Merge with a lower-priority fallback. Entries are merged per key and
    /// self wins on collision.
    pub fn with_fallback(self, fallback: SecretsConfig) -> SecretsConfig {
        let mut app = fallback.app;
        app.extend(self.app);

        let mut agents = fallback.agents;
        for (agent_id, entries) in self.agents {
            agents.entry(agent_id).or_default().extend(entries);
        }

        SecretsConfig { app, agents }
    }
}
