use std::path::PathBuf;

/// Errors related to configuration loading, parsing and saving.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Failed to serialize config for {path}: {message}")]
    SerializeError { path: PathBuf, message: String },

    #[error("Config source is read-only")]
    ReadOnly,
}

/// Errors raised by the orchestration façade and the registries behind it.
///
/// Each variant maps onto one protocol error code; see
/// [`crate::gateway::protocol::ErrorCode`].
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("unknown app run: {run_id}")]
    NotFound { run_id: String },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("subagent limit reached for app run ({active}/{cap})")]
    Forbidden { active: usize, cap: usize },

    #[error("subagent spawn failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors related to scoped secret management.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretsError {
    #[error("missing key")]
    MissingKey,

    #[error("missing value")]
    MissingValue,

    #[error("missing agentId for agent scope")]
    MissingAgentId,

    #[error("secret not found")]
    NotFound,

    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

impl From<SecretsError> for OrchestrationError {
    fn from(err: SecretsError) -> Self {
        OrchestrationError::InvalidRequest(err.to_string())
    }
}
