//! App-run runtime: the run registry and the sandbox and tool
//! collaborators consulted when a run is created.

pub mod registry;
pub mod run;
pub mod sandbox;
pub mod tools;

pub use registry::{DEFAULT_STOP_REASON, RunRegistry};
pub use run::{AppRun, AppRunState, CreateRunParams};
pub use sandbox::{ProfileSandboxResolver, SandboxContext, SandboxResolver};
pub use tools::{BuiltinToolCatalog, ToolCatalog};
