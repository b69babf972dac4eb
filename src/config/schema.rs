use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::secrets::SecretsConfig;

/// The TOML file structure for agentic-app.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general: Option<GeneralSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagents: Option<SubagentsSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<SecretsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralSection {
    pub workspace: Option<String>,
    /// Session key used when a request does not name one.
    pub main_session: Option<String>,
    /// Agent id used when a request does not name one.
    pub main_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxSection {
    pub default_profile: Option<SandboxProfile>,
    pub workspace_root: Option<String>,
    pub workspace_mode: Option<WorkspaceMode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsSection {
    pub bundles: Option<BundlesSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundlesSection {
    pub file: Option<bool>,
    pub browser: Option<bool>,
    pub exec: Option<bool>,
    pub api: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubagentsSection {
    /// Cap on active subagent runs per app run.
    pub max_active_runs: Option<usize>,
    pub routing: Option<SubagentRouting>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiSection {
    pub expose_runs: Option<bool>,
    pub default_visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSection {
    pub required: Option<bool>,
    pub mode: Option<AuthMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxProfile {
    Off,
    WorkspaceWrite,
    WorkspaceRead,
}

/// Whether app runs share one workspace or get one per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkspaceMode {
    Shared,
    Session,
}

/// Where subagent completion updates are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubagentRouting {
    Requester,
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Private,
    Operator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Gateway,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSettings {
    pub default_profile: SandboxProfile,
    pub workspace_root: Option<PathBuf>,
    pub workspace_mode: WorkspaceMode,
}

/// Which tool families an app run may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolBundles {
    pub file: bool,
    pub browser: bool,
    pub exec: bool,
    pub api: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentSettings {
    pub max_active_runs: usize,
    pub routing: SubagentRouting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSettings {
    pub expose_runs: bool,
    pub default_visibility: Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthSettings {
    pub required: bool,
    pub mode: AuthMode,
}

/// Resolved app-run settings. Snapshotted into every run at creation, so
/// it deliberately carries no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppRunConfig {
    pub sandbox: SandboxSettings,
    pub tools: ToolBundles,
    pub subagents: SubagentSettings,
    pub ui: UiSettings,
    pub auth: AuthSettings,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub workspace: PathBuf,
    pub main_session: String,
    pub main_agent: String,
    pub app: AppRunConfig,
    pub secrets: SecretsConfig,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub workspace: Option<PathBuf>,
    pub main_session: Option<String>,
    pub main_agent: Option<String>,
    pub default_profile: Option<SandboxProfile>,
    pub workspace_root: Option<PathBuf>,
    pub workspace_mode: Option<WorkspaceMode>,
    pub bundle_file: Option<bool>,
    pub bundle_browser: Option<bool>,
    pub bundle_exec: Option<bool>,
    pub bundle_api: Option<bool>,
    pub max_active_runs: Option<usize>,
    pub routing: Option<SubagentRouting>,
    pub expose_runs: Option<bool>,
    pub default_visibility: Option<Visibility>,
    pub auth_required: Option<bool>,
    pub auth_mode: Option<AuthMode>,
    pub secrets: SecretsConfig,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ConfigFile {
    /// Flatten the file's sections into a [`PartialConfig`] layer.
    pub fn to_partial(&self) -> PartialConfig {
        let general = self.general.clone().unwrap_or_default();
        let sandbox = self.sandbox.clone().unwrap_or_default();
        let bundles = self
            .tools
            .clone()
            .and_then(|t| t.bundles)
            .unwrap_or_default();
        let subagents = self.subagents.clone().unwrap_or_default();
        let ui = self.ui.clone().unwrap_or_default();
        let auth = self.auth.clone().unwrap_or_default();

        PartialConfig {
            workspace: non_empty(general.workspace).map(PathBuf::from),
            main_session: non_empty(general.main_session),
            main_agent: non_empty(general.main_agent),
            default_profile: sandbox.default_profile,
            workspace_root: non_empty(sandbox.workspace_root).map(PathBuf::from),
            workspace_mode: sandbox.workspace_mode,
            bundle_file: bundles.file,
            bundle_browser: bundles.browser,
            bundle_exec: bundles.exec,
            bundle_api: bundles.api,
            max_active_runs: subagents.max_active_runs,
            routing: subagents.routing,
            expose_runs: ui.expose_runs,
            default_visibility: ui.default_visibility,
            auth_required: auth.required,
            auth_mode: auth.mode,
            secrets: self.secrets.clone().unwrap_or_default(),
        }
    }
}
