use serde::Serialize;

use crate::config::AppRunConfig;
use crate::orchestration::SpawnResult;

/// Lifecycle state of an app run. Moves only forward:
/// `created -> running -> stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRunState {
    Created,
    Running,
    Stopped,
}

/// Snapshot of one app run. Callers always receive clones; the live record
/// stays inside [`super::RunRegistry`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRun {
    pub run_id: String,
    pub session_key: String,
    pub agent_id: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<i64>,
    pub state: AppRunState,
    /// Configuration as it was when the run was created.
    pub config: AppRunConfig,
    pub sandboxed: bool,
    pub tool_names: Vec<String>,
    pub active_subagents: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_spawn: Option<SpawnResult>,
}

/// Parameters for [`super::RunRegistry::create`]. Blank values count as
/// absent.
#[derive(Clone, Debug, Default)]
pub struct CreateRunParams {
    pub run_id: Option<String>,
    pub session_key: Option<String>,
    pub agent_id: Option<String>,
    pub workspace_dir: Option<std::path::PathBuf>,
}
