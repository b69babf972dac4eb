//! Delivery of operator messages to sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::orchestration::now_ms;

/// Delivers a text message into a session, used by the `steer` and
/// `message` subagent actions. The returned JSON is passed back to the
/// caller as the action result.
#[async_trait]
pub trait SessionMessenger: Send + Sync {
    async fn send(&self, session_key: &str, message: &str) -> anyhow::Result<Value>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxMessage {
    pub message: String,
    pub queued_at: i64,
}

/// Queues messages in memory, one inbox per session. Whoever drives the
/// session drains its inbox.
#[derive(Clone, Default)]
pub struct InboxMessenger {
    inboxes: Arc<Mutex<HashMap<String, Vec<InboxMessage>>>>,
}

impl InboxMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<InboxMessage>>> {
        self.inboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of undelivered messages for a session.
    pub fn pending(&self, session_key: &str) -> usize {
        self.lock().get(session_key).map_or(0, Vec::len)
    }

    /// Take every queued message for a session, oldest first.
    pub fn drain(&self, session_key: &str) -> Vec<InboxMessage> {
        self.lock().remove(session_key).unwrap_or_default()
    }
}

#[async_trait]
impl SessionMessenger for InboxMessenger {
    async fn send(&self, session_key: &str, message: &str) -> anyhow::Result<Value> {
        let mut inboxes = self.lock();
        let inbox = inboxes.entry(session_key.to_string()).or_default();
        inbox.push(InboxMessage {
            message: message.to_string(),
            queued_at: now_ms(),
        });
        let queued = inbox.len();
        tracing::debug!(session_key, queued, "Message queued");
        Ok(json!({ "sessionKey": session_key, "queued": queued }))
    }
}
