//! Custom tools: user-defined HTTP endpoints and local scripts surfaced as
//! first-class tools.
//!
//! Each tool is declared in config with a parameter table; the registry
//! builds an input schema from the declaration and the dispatcher routes a
//! call to whichever execution mode the config names:
//!
//! ```text
//! config ── endpoint set ──▶ HTTP: GET encodes params as a query string,
//! │                          everything else sends them as a JSON body
//! └──────── script set ────▶ child process: --key=value argv pairs plus
//!                            TOOL_PARAM_KEY environment overrides
//! ```
//!
//! Raw output that parses as JSON is returned verbatim; anything else is
//! wrapped in an `{status: "ok", output}` envelope. Failures become
//! `{status: "error", error}`, never a transport-level fault.

use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::warn;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const HTTP_BODY_PREVIEW: usize = 500;
const OUTPUT_CAP_BYTES: usize = 1024 * 1024;
const NO_OUTPUT: &str = "(no output)";

#[derive(Debug, Error)]
pub enum CustomToolError {
    #[error("{0}")]
    Http(String),

    #[error("script failed: {0}")]
    Script(String),

    #[error("tool timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("invalid tool config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Boolean,
}

impl ParamKind {
    fn schema_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolParam {
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Filled in before execution when the caller omits the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Declarative config for one custom tool. Exactly one of `endpoint` or
/// `script` must be set for the entry to register.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomToolConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub label: Option<String>,
    pub endpoint: Option<String>,
    pub script: Option<String>,
    /// HTTP method; defaults to POST.
    pub method: Option<String>,
    /// Merged over the default headers on non-GET requests.
    pub headers: Option<IndexMap<String, String>>,
    pub parameters: IndexMap<String, ToolParam>,
    pub timeout_seconds: Option<u64>,
}

impl CustomToolConfig {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

/// A config that survived registration, keyed by its definite name.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    pub config: CustomToolConfig,
}

/// Filter configs down to registrable tools. Entries lacking a name, a
/// description, or exactly one execution mode are skipped, as are names
/// colliding with an existing tool; built-ins are never overridden.
pub fn register_tools(
    configs: &[CustomToolConfig],
    existing: &HashSet<String>,
) -> Vec<RegisteredTool> {
    let mut seen = existing.clone();
    let mut tools = Vec::new();
    for config in configs {
        let (Some(name), Some(description)) = (&config.name, &config.description) else {
            warn!("skipping custom tool without name/description");
            continue;
        };
        match (&config.endpoint, &config.script) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                warn!(tool = %name, "skipping custom tool: exactly one of endpoint/script required");
                continue;
            }
        }
        if seen.contains(name) {
            warn!(tool = %name, "skipping custom tool: name already taken");
            continue;
        }
        seen.insert(name.clone());
        tools.push(RegisteredTool {
            name: name.clone(),
            description: description.clone(),
            config: config.clone(),
        });
    }
    tools
}

/// JSON-Schema object for the tool's parameters, built from the declaration.
pub fn input_schema(config: &CustomToolConfig) -> Map<String, Value> {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for (name, param) in &config.parameters {
        let mut prop = Map::new();
        prop.insert("type".to_string(), json!(param.kind.schema_type()));
        if let Some(description) = &param.description {
            prop.insert("description".to_string(), json!(description));
        }
        properties.insert(name.clone(), Value::Object(prop));
        if param.required {
            required.push(json!(name));
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    schema
}

/// Fill declared defaults for parameters the caller omitted.
pub fn fill_defaults(config: &CustomToolConfig, params: &mut Map<String, Value>) {
    for (name, param) in &config.parameters {
        if params.contains_key(name) {
            continue;
        }
        if let Some(default) = &param.default {
            params.insert(name.clone(), default.clone());
        }
    }
}

/// Dispatches calls for every registered custom tool.
pub struct ToolDispatcher {
    http: reqwest::Client,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Execute the tool and normalize the outcome into a JSON result record.
    pub async fn dispatch(&self, config: &CustomToolConfig, mut params: Map<String, Value>) -> Value {
        fill_defaults(config, &mut params);
        let outcome = if config.endpoint.is_some() {
            self.run_http(config, &params).await
        } else {
            run_script(config, &params).await
        };
        match outcome {
            Ok(raw) => normalize_output(&raw),
            Err(err) => json!({ "status": "error", "error": err.to_string() }),
        }
    }

    async fn run_http(
        &self,
        config: &CustomToolConfig,
        params: &Map<String, Value>,
    ) -> Result<String, CustomToolError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| CustomToolError::InvalidConfig("endpoint missing".to_string()))?;
        let method_name = config.method.as_deref().unwrap_or("POST").to_uppercase();
        let method = reqwest::Method::from_bytes(method_name.as_bytes())
            .map_err(|_| CustomToolError::InvalidConfig(format!("bad method: {method_name}")))?;

        let mut request = self.http.request(method.clone(), endpoint);
        if method == reqwest::Method::GET {
            let pairs: Vec<(String, String)> = params
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), value_string(v)))
                .collect();
            request = request.query(&pairs);
        } else {
            // .json sets the default Content-Type; user headers merge over it.
            request = request.json(&Value::Object(params.clone()));
        }
        if let Some(headers) = &config.headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let seconds = config.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let response = request
            .timeout(config.timeout())
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CustomToolError::Timeout { seconds }
                } else {
                    CustomToolError::Http(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(HTTP_BODY_PREVIEW).collect();
            return Err(CustomToolError::Http(format!(
                "HTTP {} {}: {preview}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }
        response
            .text()
            .await
            .map_err(|err| CustomToolError::Http(err.to_string()))
    }
}

async fn run_script(
    config: &CustomToolConfig,
    params: &Map<String, Value>,
) -> Result<String, CustomToolError> {
    let script = config
        .script
        .as_deref()
        .ok_or_else(|| CustomToolError::InvalidConfig("script missing".to_string()))?;
    let tokens = shlex::split(script)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CustomToolError::InvalidConfig("unparsable script line".to_string()))?;
    let Some((program, base_args)) = tokens.split_first() else {
        return Err(CustomToolError::InvalidConfig("empty script line".to_string()));
    };

    let mut command = tokio::process::Command::new(program);
    command
        .args(base_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (name, value) in params {
        if value.is_null() {
            continue;
        }
        let rendered = value_string(value);
        command.arg(format!("--{name}={rendered}"));
        command.env(format!("TOOL_PARAM_{}", name.to_uppercase()), &rendered);
    }

    let seconds = config.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
    let output = tokio::time::timeout(config.timeout(), command.output())
        .await
        .map_err(|_| CustomToolError::Timeout { seconds })?
        .map_err(|err| CustomToolError::Script(err.to_string()))?;

    let stdout = capped_text(&output.stdout);
    let stderr = capped_text(&output.stderr);
    if stdout.trim().is_empty() && !stderr.trim().is_empty() {
        Ok(stderr)
    } else if stdout.trim().is_empty() {
        Ok(NO_OUTPUT.to_string())
    } else {
        Ok(stdout)
    }
}

/// Raw output that parses as JSON passes through; plain text gets wrapped.
fn normalize_output(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => value,
        Err(_) => json!({ "status": "ok", "output": raw }),
    }
}

fn value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn capped_text(bytes: &[u8]) -> String {
    let slice = &bytes[..bytes.len().min(OUTPUT_CAP_BYTES)];
    String::from_utf8_lossy(slice).into_owned()
}
