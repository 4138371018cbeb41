//! MCP surface: one tool per component plus dynamically registered custom
//! tools.
//!
//! The built-in tools are static, but custom tools only exist once the
//! config snapshot is loaded, so the handler implements `list_tools` and
//! `call_tool` directly instead of going through the static router macro.
//! Every tool returns a single text content block holding the component's
//! pretty-printed JSON result record; component errors are encoded into
//! that record, never surfaced as protocol faults.

use std::collections::HashSet;
use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, JsonObject, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ServerHandler;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::info;

use crate::board::{MessageBoard, MessageBoardRequest};
use crate::config::Config;
use crate::custom::{self, RegisteredTool, ToolDispatcher};
use crate::gateway::Gateway;
use crate::knowledge::{KnowledgeRequest, KnowledgeStore};
use crate::queue::{TaskQueue, TaskQueueRequest};
use crate::registry::SubagentRegistry;
use crate::templates::{SessionTemplateRequest, SessionTemplates};
use crate::workflow::{WorkflowEngine, WorkflowRequest};
use crate::workspace;

/// Tool names owned by the server itself; custom tools may not shadow them.
pub const BUILTIN_TOOLS: [&str; 5] = [
    "task_queue",
    "message_board",
    "knowledge",
    "session_template",
    "workflow",
];

pub struct OrchestrationServer {
    queue: TaskQueue,
    board: MessageBoard,
    knowledge: KnowledgeStore,
    templates: SessionTemplates,
    engine: WorkflowEngine,
    custom: Vec<RegisteredTool>,
    dispatcher: ToolDispatcher,
}

impl OrchestrationServer {
    pub fn new(
        config: Arc<Config>,
        gateway: Arc<dyn Gateway>,
        registry: Arc<SubagentRegistry>,
    ) -> Self {
        let root = workspace::resolve(&config);
        let existing: HashSet<String> = BUILTIN_TOOLS.iter().map(|s| s.to_string()).collect();
        let custom = custom::register_tools(&config.tools.custom, &existing);
        info!(
            workspace = %root.display(),
            custom_tools = custom.len(),
            "orchestration server ready"
        );

        Self {
            queue: TaskQueue::new(&root),
            board: MessageBoard::new(&root),
            knowledge: KnowledgeStore::new(&root),
            templates: SessionTemplates::new(
                config.session.templates.clone(),
                gateway.clone(),
                config.main_session_key(),
            ),
            engine: WorkflowEngine::new(&config, gateway, registry, &root),
            custom,
            dispatcher: ToolDispatcher::new(),
        }
    }

    fn custom_tool(&self, name: &str) -> Option<&RegisteredTool> {
        self.custom.iter().find(|t| t.name == name)
    }
}

impl ServerHandler for OrchestrationServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = "Coordination primitives for a multi-agent runtime.\n\
             - task_queue: persistent priority queue with claim/complete/fail and bounded retry\n\
             - message_board: append-only boards for inter-agent messages, with since-cursor reads\n\
             - knowledge: structured key-value store with partial-match query\n\
             - session_template: apply named model/thinking presets to a session\n\
             - workflow: run sub-agent steps sequentially, in parallel, or as a DAG, \
               with checkpoint/resume\n\
             Custom tools from the config are listed alongside these.";
        ServerInfo {
            instructions: Some(instructions.to_string()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let mut tools = vec![
            tool_entry::<TaskQueueRequest>(
                "task_queue",
                "Persistent task queue with priority scheduling and automatic retry. \
                 Actions: add, claim, complete, fail, retry, list, stats, clear.",
            ),
            tool_entry::<MessageBoardRequest>(
                "message_board",
                "Append-only message boards for agent coordination. \
                 Actions: post, read, list, clear.",
            ),
            tool_entry::<KnowledgeRequest>(
                "knowledge",
                "Structured knowledge store keyed by category and key, with partial-match \
                 query. Actions: set, get, delete, list, query, categories.",
            ),
            tool_entry::<SessionTemplateRequest>(
                "session_template",
                "Named model/thinking presets applied to agent sessions. \
                 Actions: list, apply.",
            ),
            tool_entry::<WorkflowRequest>(
                "workflow",
                "Run sub-agent steps under a sequential, parallel, or DAG pattern with \
                 on-disk checkpointing and resume.",
            ),
        ];
        for tool in &self.custom {
            tools.push(Tool::new(
                tool.name.clone(),
                tool.description.clone(),
                Arc::new(custom::input_schema(&tool.config)),
            ));
        }
        Ok(ListToolsResult {
            meta: None,
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let args = request.arguments.unwrap_or_default();
        let result = match request.name.as_ref() {
            "task_queue" => match parse::<TaskQueueRequest>(args) {
                Ok(req) => self.queue.execute(req).await.unwrap_or_else(storage_error),
                Err(err) => err,
            },
            "message_board" => match parse::<MessageBoardRequest>(args) {
                Ok(req) => self.board.execute(req).await.unwrap_or_else(storage_error),
                Err(err) => err,
            },
            "knowledge" => match parse::<KnowledgeRequest>(args) {
                Ok(req) => self.knowledge.execute(req).await.unwrap_or_else(storage_error),
                Err(err) => err,
            },
            "session_template" => match parse::<SessionTemplateRequest>(args) {
                Ok(req) => self.templates.execute(req).await,
                Err(err) => err,
            },
            "workflow" => match parse::<WorkflowRequest>(args) {
                Ok(req) => self.engine.run(req).await,
                Err(err) => err,
            },
            name => match self.custom_tool(name) {
                Some(tool) => self.dispatcher.dispatch(&tool.config, args).await,
                None => {
                    return Err(ErrorData::invalid_params(
                        format!("unknown tool: {name}"),
                        None,
                    ))
                }
            },
        };

        let text = serde_json::to_string_pretty(&result)
            .map_err(|err| ErrorData::internal_error(err.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

fn parse<T: DeserializeOwned>(args: JsonObject) -> Result<T, Value> {
    serde_json::from_value(Value::Object(args))
        .map_err(|err| json!({ "status": "error", "error": format!("invalid parameters: {err}") }))
}

fn storage_error(err: crate::storage::StorageError) -> Value {
    json!({ "status": "error", "error": err.to_string() })
}

fn tool_entry<T: schemars::JsonSchema>(name: &'static str, description: &'static str) -> Tool {
    Tool::new(name, description, Arc::new(request_schema::<T>()))
}

fn request_schema<T: schemars::JsonSchema>() -> JsonObject {
    let schema = schemars::schema_for!(T);
    match serde_json::to_value(schema) {
        Ok(Value::Object(map)) => map,
        _ => JsonObject::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_schema_is_object_schema() {
        let schema = request_schema::<TaskQueueRequest>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["action"].is_object());
    }

    #[test]
    fn test_workflow_schema_includes_steps() {
        let schema = request_schema::<WorkflowRequest>();
        assert!(schema["properties"]["steps"].is_object());
        assert!(schema["properties"]["pattern"].is_object());
    }
}
