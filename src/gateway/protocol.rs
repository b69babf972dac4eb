//! Wire types for the JSON gateway protocol.
//!
//! One request frame in, one response frame out:
//! `{"id", "method", "params"}` → `{"id", "ok", "payload" | "error"}`.
//! Parameter objects reject unknown fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OrchestrationError;
use crate::secrets::SecretTarget;

#[derive(Clone, Debug, Deserialize)]
pub struct RequestFrame {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponseFrame {
    pub id: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    pub fn success(id: Value, payload: Value) -> Self {
        Self {
            id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(id: Value, error: ErrorShape) -> Self {
        Self {
            id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidRequest,
    Forbidden,
    UpstreamFailure,
    /// Configuration could not be loaded or saved.
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorShape {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorShape {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }
}

impl From<&OrchestrationError> for ErrorShape {
    fn from(err: &OrchestrationError) -> Self {
        let message = err.to_string();
        match err {
            OrchestrationError::NotFound { run_id } => Self {
                code: ErrorCode::NotFound,
                message,
                details: Some(serde_json::json!({ "runId": run_id })),
            },
            OrchestrationError::InvalidRequest(_) => Self::new(ErrorCode::InvalidRequest, message),
            OrchestrationError::Forbidden { active, cap } => Self {
                code: ErrorCode::Forbidden,
                message,
                details: Some(serde_json::json!({ "active": active, "cap": cap })),
            },
            OrchestrationError::Upstream(_) => Self::new(ErrorCode::UpstreamFailure, message),
            OrchestrationError::Config(_) => Self::new(ErrorCode::Unavailable, message),
        }
    }
}

impl From<OrchestrationError> for ErrorShape {
    fn from(err: OrchestrationError) -> Self {
        Self::from(&err)
    }
}

// ===== Method parameters =====

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppCreateParams {
    pub run_id: Option<String>,
    pub session_key: Option<String>,
    pub agent_id: Option<String>,
    pub workspace_dir: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunIdParams {
    pub run_id: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppStopParams {
    pub run_id: String,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppStatusParams {
    pub run_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppSpawnParams {
    pub run_id: String,
    pub task: String,
    pub label: Option<String>,
    pub agent_id: Option<String>,
    pub model: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GraphParams {
    pub session_key: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActionParams {
    pub session_key: Option<String>,
    pub action: String,
    pub target: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretsListParams {
    pub agent_id: Option<String>,
}

/// Unknown target names in `targets` are dropped, not rejected.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretsSetParams {
    pub scope: Option<String>,
    pub agent_id: Option<String>,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub targets: Vec<SecretTarget>,
    #[serde(default)]
    pub allow_host_exec: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretsDeleteParams {
    pub scope: Option<String>,
    pub agent_id: Option<String>,
    pub key: String,
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretsAssignParams {
    pub scope: Option<String>,
    pub agent_id: Option<String>,
    pub key: String,
    pub target: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretsEnvParams {
    pub agent_id: Option<String>,
    pub target: String,
    pub host: Option<String>,
}
