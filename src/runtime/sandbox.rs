use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{AppConfig, SandboxProfile, WorkspaceMode};

/// Where and how an app run's tools are confined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxContext {
    pub profile: SandboxProfile,
    pub workspace_dir: PathBuf,
}

impl SandboxContext {
    /// Whether tools may write inside the workspace.
    pub fn is_writable(&self) -> bool {
        self.profile == SandboxProfile::WorkspaceWrite
    }
}

/// Decides whether a run is sandboxed and where its workspace lives.
pub trait SandboxResolver: Send + Sync {
    fn resolve(
        &self,
        config: &AppConfig,
        session_key: &str,
        workspace_dir: Option<&Path>,
    ) -> Option<SandboxContext>;
}

/// Resolves sandboxes from the `[sandbox]` configuration section.
///
/// Profile `off` means no sandbox. Otherwise the workspace is the explicit
/// directory when one is given, else the configured workspace root (or the
/// app workspace), with a per-session subdirectory in `session` mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileSandboxResolver;

impl SandboxResolver for ProfileSandboxResolver {
    fn resolve(
        &self,
        config: &AppConfig,
        session_key: &str,
        workspace_dir: Option<&Path>,
    ) -> Option<SandboxContext> {
        let settings = &config.app.sandbox;
        if settings.default_profile == SandboxProfile::Off {
            return None;
        }

        let workspace_dir = match workspace_dir.filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => {
                let root = settings
                    .workspace_root
                    .clone()
                    .unwrap_or_else(|| config.workspace.clone());
                match settings.workspace_mode {
                    WorkspaceMode::Shared => root,
                    WorkspaceMode::Session => root.join(session_dir_name(session_key)),
                }
            }
        };

        Some(SandboxContext {
            profile: settings.default_profile,
            workspace_dir,
        })
    }
}

/// Filesystem-safe directory name for a session key.
pub fn session_dir_name(session_key: &str) -> String {
    let name: String = session_key
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        "session".to_string()
    } else {
        name
    }
}
