//! Gateway RPC: the outbound transport to the sibling process that owns
//! agent sessions.
//!
//! Everything behind the gateway (models, streaming, auth) is opaque to this
//! crate. The contract is a single [`Gateway::call`] taking a method name,
//! JSON params, and an explicit deadline; typed helpers cover the three
//! methods the core uses: `sessions.patch`, `sessions.history`, and `agent`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Deadline for `sessions.patch` and other auxiliary calls.
pub const PATCH_TIMEOUT_MS: u64 = 10_000;

/// Default gateway endpoint when the config does not name one.
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:18789/rpc";

const ERROR_BODY_PREVIEW: usize = 500;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport: {0}")]
    Transport(String),

    #[error("gateway call {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("gateway rejected {method}: {message}")]
    Rejected { method: String, message: String },
}

/// RPC transport to the session gateway. Implementations must apply the
/// per-call deadline themselves.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn call(&self, method: &str, params: Value, timeout_ms: u64)
        -> Result<Value, GatewayError>;
}

/// HTTP gateway: POSTs `{method, params}` to a fixed URL and decodes the
/// JSON body as the call result.
pub struct HttpGateway {
    url: String,
    http: reqwest::Client,
}

impl HttpGateway {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn call(
        &self,
        method: &str,
        params: Value,
        timeout_ms: u64,
    ) -> Result<Value, GatewayError> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "method": method, "params": params }))
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    GatewayError::Timeout {
                        method: method.to_string(),
                        timeout_ms,
                    }
                } else {
                    GatewayError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(GatewayError::Rejected {
                method: method.to_string(),
                message: format!("HTTP {status}: {preview}"),
            });
        }

        response
            .json()
            .await
            .map_err(|err| GatewayError::Transport(format!("invalid gateway response: {err}")))
    }
}

// ── Typed call helpers ────────────────────────────────────────────────

/// One message from `sessions.history`. The assistant's reply text lives in
/// `content`, with `text` as a fallback for older gateways.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl HistoryMessage {
    pub fn body(&self) -> Option<&str> {
        self.content
            .as_deref()
            .or(self.text.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Parameters for the `agent` method, which spawns a run on a (possibly
/// fresh)
/// session and returns immediately with a run id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpawn {
    pub message: String,
    pub session_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub idempotency_key: String,
    pub deliver: bool,
    pub lane: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Run timeout in seconds, enforced gateway-side.
    pub timeout: u64,
    pub label: String,
    pub spawned_by: String,
}

pub async fn patch_session(
    gateway: &dyn Gateway,
    params: Value,
) -> Result<Value, GatewayError> {
    gateway.call("sessions.patch", params, PATCH_TIMEOUT_MS).await
}

pub async fn session_history(
    gateway: &dyn Gateway,
    key: &str,
    limit: u32,
) -> Result<Vec<HistoryMessage>, GatewayError> {
    let result = gateway
        .call(
            "sessions.history",
            json!({ "key": key, "limit": limit }),
            PATCH_TIMEOUT_MS,
        )
        .await?;
    let messages = result.get("messages").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(messages)
        .map_err(|err| GatewayError::Transport(format!("invalid history payload: {err}")))
}

pub async fn spawn_agent(
    gateway: &dyn Gateway,
    spawn: &AgentSpawn,
    timeout_ms: u64,
) -> Result<String, GatewayError> {
    let params = serde_json::to_value(spawn)
        .map_err(|err| GatewayError::Transport(format!("unencodable spawn params: {err}")))?;
    let result = gateway.call("agent", params, timeout_ms).await?;
    Ok(result
        .get("runId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_message_body_prefers_content() {
        let msg = HistoryMessage {
            role: "assistant".to_string(),
            content: Some("answer".to_string()),
            text: Some("older field".to_string()),
        };
        assert_eq!(msg.body(), Some("answer"));
    }

    #[test]
    fn test_history_message_body_falls_back_to_text() {
        let msg = HistoryMessage {
            role: "assistant".to_string(),
            content: None,
            text: Some("legacy".to_string()),
        };
        assert_eq!(msg.body(), Some("legacy"));
    }

    #[test]
    fn test_history_message_blank_is_none() {
        let msg = HistoryMessage {
            role: "assistant".to_string(),
            content: Some("   ".to_string()),
            text: None,
        };
        assert_eq!(msg.body(), None);
    }

    #[test]
    fn test_agent_spawn_serializes_camel_case() {
        let spawn = AgentSpawn {
            message: "do the thing".to_string(),
            session_key: "agent:main:workflow:abc".to_string(),
            channel: None,
            to: None,
            account_id: None,
            idempotency_key: "idem".to_string(),
            deliver: false,
            lane: "subagent".to_string(),
            extra_system_prompt: None,
            thinking: None,
            timeout: 600,
            label: "step".to_string(),
            spawned_by: "agent:main:main".to_string(),
        };
        let value = serde_json::to_value(&spawn).unwrap();
        assert_eq!(value["sessionKey"], "agent:main:workflow:abc");
        assert_eq!(value["spawnedBy"], "agent:main:main");
        assert_eq!(value["idempotencyKey"], "idem");
        assert!(value.get("channel").is_none());
    }
}
