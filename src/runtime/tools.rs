//! Tool catalog and bundle filtering for app runs.
//!
//! The core never runs tools; it only decides which tool names a run is
//! offered, based on the enabled bundles and the run's sandbox.

use super::sandbox::SandboxContext;
use crate::config::ToolBundles;

/// Tool families that can be switched on or off per app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolBundle {
    File,
    Browser,
    Exec,
    Api,
}

const FILE_TOOL_NAMES: [&str; 5] = ["read", "write", "edit", "apply_patch", "image"];
const MUTATING_FILE_TOOLS: [&str; 3] = ["write", "edit", "apply_patch"];

/// Classify a tool name into its bundle. Anything unrecognised is `api`.
pub fn bundle_for_tool(name: &str) -> ToolBundle {
    if FILE_TOOL_NAMES.contains(&name) || name.starts_with("glob") || name.starts_with("ls") {
        ToolBundle::File
    } else if name.starts_with("browser") || name.contains("screenshot") {
        ToolBundle::Browser
    } else if name == "exec" || name == "process" {
        ToolBundle::Exec
    } else {
        ToolBundle::Api
    }
}

/// Whether the bundle a tool belongs to is enabled.
pub fn include_tool_by_bundle(name: &str, bundles: &ToolBundles) -> bool {
    match bundle_for_tool(name) {
        ToolBundle::File => bundles.file,
        ToolBundle::Browser => bundles.browser,
        ToolBundle::Exec => bundles.exec,
        ToolBundle::Api => bundles.api,
    }
}

/// Lists the tools available to a session before bundle filtering.
pub trait ToolCatalog: Send + Sync {
    fn tool_names(&self, session_key: &str, sandbox: Option<&SandboxContext>) -> Vec<String>;
}

/// The built-in tool set. A read-only sandbox drops the mutating file tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinToolCatalog;

pub const BUILTIN_TOOLS: [&str; 15] = [
    "read",
    "write",
    "edit",
    "apply_patch",
    "image",
    "glob",
    "ls",
    "exec",
    "process",
    "browser",
    "browser_screenshot",
    "web_search",
    "web_fetch",
    "sessions_send",
    "sessions_spawn",
];

impl ToolCatalog for BuiltinToolCatalog {
    fn tool_names(&self, _session_key: &str, sandbox: Option<&SandboxContext>) -> Vec<String> {
        let read_only = sandbox.is_some_and(|s| !s.is_writable());
        BUILTIN_TOOLS
            .iter()
            .filter(|name| !(read_only && MUTATING_FILE_TOOLS.contains(*name)))
            .map(|name| name.to_string())
            .collect()
    }
}

/// Catalog tools for a session, filtered by the enabled bundles. Order is
/// the catalog's.
pub fn available_tools(
    catalog: &dyn ToolCatalog,
    session_key: &str,
    sandbox: Option<&SandboxContext>,
    bundles: &ToolBundles,
) -> Vec<String> {
    catalog
        .tool_names(session_key, sandbox)
        .into_iter()
        .filter(|name| include_tool_by_bundle(name, bundles))
        .collect()
}
