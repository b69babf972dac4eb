use super::schema::{
    AppConfig, AppRunConfig, AuthMode, AuthSettings, PartialConfig, SandboxProfile,
    SandboxSettings, SubagentRouting, SubagentSettings, ToolBundles, UiSettings, Visibility,
    WorkspaceMode,
};
use std::path::PathBuf;

pub const DEFAULT_MAIN_SESSION: &str = "agent:main";
pub const DEFAULT_MAIN_AGENT: &str = "main";
pub const DEFAULT_MAX_ACTIVE_RUNS: usize = 3;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence; secrets merge per key.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            workspace: self.workspace.or(fallback.workspace),
            main_session: self.main_session.or(fallback.main_session),
            main_agent: self.main_agent.or(fallback.main_agent),
            default_profile: self.default_profile.or(fallback.default_profile),
            workspace_root: self.workspace_root.or(fallback.workspace_root),
            workspace_mode: self.workspace_mode.or(fallback.workspace_mode),
            bundle_file: self.bundle_file.or(fallback.bundle_file),
            bundle_browser: self.bundle_browser.or(fallback.bundle_browser),
            bundle_exec: self.bundle_exec.or(fallback.bundle_exec),
            bundle_api: self.bundle_api.or(fallback.bundle_api),
            max_active_runs: self.max_active_runs.or(fallback.max_active_runs),
            routing: self.routing.or(fallback.routing),
            expose_runs: self.expose_runs.or(fallback.expose_runs),
            default_visibility: self.default_visibility.or(fallback.default_visibility),
            auth_required: self.auth_required.or(fallback.auth_required),
            auth_mode: self.auth_mode.or(fallback.auth_mode),
            secrets: self.secrets.with_fallback(fallback.secrets),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        let app = AppRunConfig {
            sandbox: SandboxSettings {
                default_profile: self
                    .default_profile
                    .unwrap_or(SandboxProfile::WorkspaceWrite),
                workspace_root: self.workspace_root,
                workspace_mode: self.workspace_mode.unwrap_or(WorkspaceMode::Session),
            },
            tools: ToolBundles {
                file: self.bundle_file.unwrap_or(true),
                browser: self.bundle_browser.unwrap_or(true),
                exec: self.bundle_exec.unwrap_or(true),
                api: self.bundle_api.unwrap_or(true),
            },
            subagents: SubagentSettings {
                max_active_runs: self.max_active_runs.unwrap_or(DEFAULT_MAX_ACTIVE_RUNS),
                routing: self.routing.unwrap_or(SubagentRouting::Requester),
            },
            ui: UiSettings {
                expose_runs: self.expose_runs.unwrap_or(true),
                default_visibility: self.default_visibility.unwrap_or(Visibility::Operator),
            },
            auth: AuthSettings {
                required: self.auth_required.unwrap_or(true),
                mode: self.auth_mode.unwrap_or(AuthMode::Gateway),
            },
        };

        AppConfig {
            workspace: self
                .workspace
                .unwrap_or_else(|| PathBuf::from("./workspace")),
            main_session: self
                .main_session
                .unwrap_or_else(|| DEFAULT_MAIN_SESSION.to_string()),
            main_agent: self
                .main_agent
                .unwrap_or_else(|| DEFAULT_MAIN_AGENT.to_string()),
            app,
            secrets: self.secrets,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        PartialConfig::default().finalize()
    }
}
