//! Session templates: named model/thinking presets applied to a gateway
//! session.
//!
//! Templates live in the config snapshot under `session.templates`. Applying
//! one issues up to two `sessions.patch` calls: the model patch is fatal on
//! failure, the thinking patch is best-effort. A template's system prompt is
//! never patched into a live session; it takes effect when a caller spawns
//! a new session from the template.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::gateway::{patch_session, Gateway};

/// Thinking level that patches the session back to no thinking.
const THINKING_OFF: &str = "off";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionTemplate {
    pub model: Option<String>,
    pub thinking: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
}

/// Request record for the `session_template` tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionTemplateRequest {
    #[schemars(description = "One of: list, apply")]
    pub action: String,
    #[schemars(description = "Template name (apply)")]
    pub template: Option<String>,
    #[schemars(description = "Target session key (apply; defaults to the caller's session)")]
    pub session_key: Option<String>,
}

pub struct SessionTemplates {
    templates: IndexMap<String, SessionTemplate>,
    gateway: Arc<dyn Gateway>,
    default_session: String,
}

impl SessionTemplates {
    pub fn new(
        templates: IndexMap<String, SessionTemplate>,
        gateway: Arc<dyn Gateway>,
        default_session: String,
    ) -> Self {
        Self {
            templates,
            gateway,
            default_session,
        }
    }

    pub async fn execute(&self, req: SessionTemplateRequest) -> Value {
        match req.action.as_str() {
            "list" => self.list(),
            "apply" => self.apply(req).await,
            other => json!({ "status": "error", "error": format!("unknown action: {other}") }),
        }
    }

    fn list(&self) -> Value {
        let templates: Vec<Value> = self
            .templates
            .iter()
            .map(|(name, tpl)| {
                json!({
                    "name": name,
                    "model": tpl.model,
                    "thinking": tpl.thinking,
                    "description": tpl.description,
                    "hasSystemPrompt": tpl.system_prompt.is_some(),
                })
            })
            .collect();
        json!({ "status": "ok", "templates": templates })
    }

    async fn apply(&self, req: SessionTemplateRequest) -> Value {
        let Some(name) = req.template else {
            return json!({ "status": "error", "error": "apply requires a template name" });
        };
        let Some(template) = self.templates.get(&name) else {
            return json!({ "status": "not_found", "template": name });
        };
        let session_key = req
            .session_key
            .unwrap_or_else(|| self.default_session.clone());

        let mut applied = Vec::new();
        if let Some(model) = &template.model {
            let patch = json!({ "key": &session_key, "model": model });
            if let Err(err) = patch_session(self.gateway.as_ref(), patch).await {
                return json!({
                    "status": "error",
                    "template": name,
                    "error": format!("model patch failed: {err}"),
                });
            }
            applied.push(format!("model={model}"));
        }
        if let Some(thinking) = &template.thinking {
            let level = if thinking == THINKING_OFF {
                Value::Null
            } else {
                json!(thinking)
            };
            let patch = json!({ "key": &session_key, "thinkingLevel": level });
            match patch_session(self.gateway.as_ref(), patch).await {
                Ok(_) => applied.push(format!("thinking={thinking}")),
                Err(err) => {
                    warn!(template = %name, %err, "thinking patch failed, continuing");
                }
            }
        }

        let mut result = json!({
            "status": "applied",
            "template": name,
            "sessionKey": session_key,
            "applied": applied,
        });
        if template.system_prompt.is_some() {
            result["note"] =
                json!("template has a system prompt; it applies when a session is spawned from it");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every call; fails any call whose params contain the marker.
    struct RecordingGateway {
        calls: Mutex<Vec<(String, Value)>>,
        fail_params_containing: Option<String>,
    }

    impl RecordingGateway {
        fn new(fail_params_containing: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_params_containing: fail_params_containing.map(String::from),
            })
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
        async fn call(
            &self,
            method: &str,
            params: Value,
            _timeout_ms: u64,
        ) -> Result<Value, GatewayError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), params.clone()));
            if let Some(marker) = &self.fail_params_containing {
                if params.to_string().contains(marker.as_str()) {
                    return Err(GatewayError::Transport("refused".to_string()));
                }
            }
            Ok(json!({}))
        }
    }

    fn templates() -> IndexMap<String, SessionTemplate> {
        let mut map = IndexMap::new();
        map.insert(
            "deep".to_string(),
            SessionTemplate {
                model: Some("anthropic/claude-opus-4".to_string()),
                thinking: Some("high".to_string()),
                description: Some("slow and thorough".to_string()),
                system_prompt: Some("You are meticulous.".to_string()),
            },
        );
        map.insert(
            "quiet".to_string(),
            SessionTemplate {
                thinking: Some("off".to_string()),
                ..Default::default()
            },
        );
        map
    }

    #[tokio::test]
    async fn test_list_reports_system_prompt_presence() {
        let gateway = RecordingGateway::new(None);
        let store = SessionTemplates::new(templates(), gateway, "agent:main:main".to_string());
        let result = store
            .execute(SessionTemplateRequest {
                action: "list".to_string(),
                ..Default::default()
            })
            .await;
        assert_eq!(result["templates"][0]["name"], "deep");
        assert_eq!(result["templates"][0]["hasSystemPrompt"], true);
        assert_eq!(result["templates"][1]["hasSystemPrompt"], false);
    }

    #[tokio::test]
    async fn test_apply_patches_model_then_thinking() {
        let gateway = RecordingGateway::new(None);
        let store =
            SessionTemplates::new(templates(), gateway.clone(), "agent:main:main".to_string());
        let result = store
            .execute(SessionTemplateRequest {
                action: "apply".to_string(),
                template: Some("deep".to_string()),
                ..Default::default()
            })
            .await;

        assert_eq!(result["status"], "applied");
        assert_eq!(result["applied"][0], "model=anthropic/claude-opus-4");
        assert_eq!(result["applied"][1], "thinking=high");
        assert!(result["note"].is_string());

        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1["key"], "agent:main:main");
        assert_eq!(calls[0].1["model"], "anthropic/claude-opus-4");
        assert_eq!(calls[1].1["thinkingLevel"], "high");
    }

    #[tokio::test]
    async fn test_thinking_off_patches_null_level() {
        let gateway = RecordingGateway::new(None);
        let store =
            SessionTemplates::new(templates(), gateway.clone(), "agent:main:main".to_string());
        store
            .execute(SessionTemplateRequest {
                action: "apply".to_string(),
                template: Some("quiet".to_string()),
                session_key: Some("agent:main:chat:7".to_string()),
                ..Default::default()
            })
            .await;

        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["key"], "agent:main:chat:7");
        assert!(calls[0].1["thinkingLevel"].is_null());
    }

    #[tokio::test]
    async fn test_model_patch_failure_is_fatal() {
        let gateway = RecordingGateway::new(Some("claude-opus-4"));
        let store = SessionTemplates::new(templates(), gateway, "agent:main:main".to_string());
        let result = store
            .execute(SessionTemplateRequest {
                action: "apply".to_string(),
                template: Some("deep".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(result["status"], "error");
    }

    #[tokio::test]
    async fn test_unknown_template_not_found() {
        let gateway = RecordingGateway::new(None);
        let store = SessionTemplates::new(templates(), gateway, "agent:main:main".to_string());
        let result = store
            .execute(SessionTemplateRequest {
                action: "apply".to_string(),
                template: Some("ghost".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(result["status"], "not_found");
    }
}
