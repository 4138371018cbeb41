//! End-to-end workflow engine tests against a scripted gateway stub.
//!
//! Covers the three pattern executors, checkpoint retention/deletion,
//! resume, admission limits, and the poll deadline.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;

use orchestration::config::Config;
use orchestration::gateway::{Gateway, GatewayError};
use orchestration::registry::SubagentRegistry;
use orchestration::workflow::{
    WorkflowCheckpoint, WorkflowEngine, WorkflowPattern, WorkflowRequest, WorkflowStep,
};

/// Gateway stub: every spawned step replies `<label>-ok` unless its label is
/// marked failing (the `agent` call errors) or silent (history stays empty).
struct StubGateway {
    calls: Mutex<Vec<(String, Value)>>,
    sessions: Mutex<std::collections::HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    silent: HashSet<String>,
}

impl StubGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            sessions: Mutex::new(std::collections::HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            silent: HashSet::new(),
        })
    }

    fn with_silent(labels: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            sessions: Mutex::new(std::collections::HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            silent: labels.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn fail_label(&self, label: &str) {
        self.failing.lock().unwrap().insert(label.to_string());
    }

    fn heal_label(&self, label: &str) {
        self.failing.lock().unwrap().remove(label);
    }

    fn spawn_count(&self, label: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(method, params)| method == "agent" && params["label"] == label)
            .count()
    }

    fn spawn_message(&self, label: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(method, params)| method == "agent" && params["label"] == label)
            .map(|(_, params)| params["message"].as_str().unwrap().to_string())
    }
}

#[async_trait]
impl Gateway for StubGateway {
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
        match method {
            "sessions.patch" => Ok(json!({})),
            "agent" => {
                let label = params["label"].as_str().unwrap_or_default().to_string();
                if self.failing.lock().unwrap().contains(&label) {
                    return Err(GatewayError::Transport("model backend unavailable".into()));
                }
                let key = params["sessionKey"].as_str().unwrap_or_default().to_string();
                self.sessions.lock().unwrap().insert(key, label.clone());
                Ok(json!({ "runId": format!("run-{label}") }))
            }
            "sessions.history" => {
                let key = params["key"].as_str().unwrap_or_default();
                let label = self.sessions.lock().unwrap().get(key).cloned();
                match label {
                    Some(label) if !self.silent.contains(&label) => Ok(json!({
                        "messages": [
                            { "role": "user", "content": "task" },
                            { "role": "assistant", "content": format!("{label}-ok") },
                        ]
                    })),
                    _ => Ok(json!({ "messages": [] })),
                }
            }
            other => Err(GatewayError::Transport(format!("unexpected method {other}"))),
        }
    }
}

fn test_config(workspace: &Path) -> Config {
    Config {
        workspace: Some(workspace.to_path_buf()),
        ..Config::default()
    }
}

fn engine(workspace: &Path, gateway: Arc<StubGateway>) -> WorkflowEngine {
    let config = test_config(workspace);
    WorkflowEngine::new(
        &config,
        gateway,
        Arc::new(SubagentRegistry::new()),
        workspace,
    )
}

fn step(name: &str) -> WorkflowStep {
    WorkflowStep {
        name: name.to_string(),
        task: format!("do {name}"),
        model: None,
        thinking: None,
        depends_on: None,
        timeout_seconds: Some(5),
    }
}

fn step_with_deps(name: &str, deps: &[&str]) -> WorkflowStep {
    WorkflowStep {
        depends_on: Some(deps.iter().map(|d| d.to_string()).collect()),
        ..step(name)
    }
}

fn request(pattern: WorkflowPattern, steps: Vec<WorkflowStep>) -> WorkflowRequest {
    WorkflowRequest {
        pattern,
        steps,
        pass_context: false,
        merge: None,
        label: None,
        resume: false,
    }
}

fn checkpoint_path(workspace: &Path, label: &str) -> PathBuf {
    workspace
        .join("checkpoints")
        .join(format!("workflow-{label}.json"))
}

#[tokio::test]
async fn sequential_passes_context_and_deletes_checkpoint() {
    let dir = tempdir().unwrap();
    let gateway = StubGateway::new();
    let engine = engine(dir.path(), gateway.clone());

    let result = engine
        .run(WorkflowRequest {
            pass_context: true,
            label: Some("seq".to_string()),
            ..request(WorkflowPattern::Sequential, vec![step("A"), step("B")])
        })
        .await;

    assert_eq!(result["status"], "done");
    assert_eq!(result["stepsCompleted"], 2);
    assert_eq!(result["stepsFailed"], 0);
    assert_eq!(result["totalSteps"], 2);
    assert_eq!(
        result["results"],
        "## A\n\nA-ok\n\n---\n\n## B\n\nB-ok"
    );
    assert!(result.get("failures").is_none());
    assert!(result.get("checkpoint").is_none());
    assert!(!checkpoint_path(dir.path(), "seq").exists());

    // A ran without context, B saw A's result.
    assert_eq!(gateway.spawn_message("A").unwrap(), "do A");
    let b_message = gateway.spawn_message("B").unwrap();
    assert!(b_message.starts_with("## Context from prior workflow steps\n\n### A\nA-ok"));
    assert!(b_message.ends_with("## Your task\n\ndo B"));
}

#[tokio::test]
async fn dag_failure_leaves_dependents_unstarted() {
    let dir = tempdir().unwrap();
    let gateway = StubGateway::new();
    gateway.fail_label("A");
    let engine = engine(dir.path(), gateway.clone());

    let result = engine
        .run(WorkflowRequest {
            label: Some("pipeline".to_string()),
            ..request(
                WorkflowPattern::Dag,
                vec![
                    step("A"),
                    step_with_deps("B", &["A"]),
                    step_with_deps("C", &["A"]),
                ],
            )
        })
        .await;

    assert_eq!(result["status"], "failed");
    assert_eq!(result["stepsCompleted"], 0);
    assert!(result["failures"]["A"]
        .as_str()
        .unwrap()
        .contains("model backend unavailable"));
    assert!(result["failures"].get("B").is_none());
    assert!(result["failures"].get("C").is_none());

    // B and C were never spawned.
    assert_eq!(gateway.spawn_count("B"), 0);
    assert_eq!(gateway.spawn_count("C"), 0);

    // Checkpoint retained for resume, with only A recorded.
    let path = checkpoint_path(dir.path(), "pipeline");
    assert_eq!(result["checkpoint"], path.display().to_string());
    let checkpoint: WorkflowCheckpoint =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(checkpoint.completed.is_empty());
    assert_eq!(checkpoint.failed.len(), 1);
    assert!(checkpoint.failed.contains_key("A"));
}

#[tokio::test]
async fn dag_joins_dependency_context() {
    let dir = tempdir().unwrap();
    let gateway = StubGateway::new();
    let engine = engine(dir.path(), gateway.clone());

    let result = engine
        .run(WorkflowRequest {
            pass_context: true,
            ..request(
                WorkflowPattern::Dag,
                vec![
                    step("left"),
                    step("right"),
                    step_with_deps("join", &["left", "right"]),
                ],
            )
        })
        .await;

    assert_eq!(result["status"], "done");
    let join_message = gateway.spawn_message("join").unwrap();
    assert!(join_message.contains("### left\nleft-ok"));
    assert!(join_message.contains("### right\nright-ok"));
}

#[tokio::test]
async fn parallel_merge_returns_name_to_result_map() {
    let dir = tempdir().unwrap();
    let gateway = StubGateway::new();
    let engine = engine(dir.path(), gateway);

    let result = engine
        .run(WorkflowRequest {
            merge: Some("merge".to_string()),
            ..request(WorkflowPattern::Parallel, vec![step("A"), step("B")])
        })
        .await;

    assert_eq!(result["status"], "done");
    assert_eq!(result["results"], json!({ "A": "A-ok", "B": "B-ok" }));
}

#[tokio::test]
async fn parallel_failure_does_not_stop_siblings() {
    let dir = tempdir().unwrap();
    let gateway = StubGateway::new();
    gateway.fail_label("B");
    let engine = engine(dir.path(), gateway.clone());

    let result = engine
        .run(request(
            WorkflowPattern::Parallel,
            vec![step("A"), step("B"), step("C")],
        ))
        .await;

    assert_eq!(result["status"], "failed");
    assert_eq!(result["stepsCompleted"], 2);
    assert_eq!(result["stepsFailed"], 1);
    assert_eq!(gateway.spawn_count("A"), 1);
    assert_eq!(gateway.spawn_count("C"), 1);
}

#[tokio::test]
async fn parallel_fan_out_rejected_at_admission() {
    let dir = tempdir().unwrap();
    let gateway = StubGateway::new();
    let engine = engine(dir.path(), gateway.clone());

    let steps: Vec<WorkflowStep> = (0..6).map(|i| step(&format!("s{i}"))).collect();
    let result = engine.run(request(WorkflowPattern::Parallel, steps)).await;

    assert_eq!(result["status"], "forbidden");
    assert!(gateway.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn spawn_depth_limit_rejected_at_admission() {
    let dir = tempdir().unwrap();
    let gateway = StubGateway::new();
    let config = test_config(dir.path());
    let registry = Arc::new(SubagentRegistry::new());
    registry.set_depth(&config.main_session_key(), 1);
    let engine = WorkflowEngine::new(&config, gateway, registry, dir.path());

    let result = engine
        .run(request(WorkflowPattern::Sequential, vec![step("A")]))
        .await;
    assert_eq!(result["status"], "forbidden");
}

#[tokio::test]
async fn duplicate_and_unknown_names_rejected() {
    let dir = tempdir().unwrap();
    let gateway = StubGateway::new();
    let engine = engine(dir.path(), gateway);

    let result = engine
        .run(request(WorkflowPattern::Sequential, vec![step("A"), step("A")]))
        .await;
    assert_eq!(result["status"], "error");

    let result = engine
        .run(request(
            WorkflowPattern::Dag,
            vec![step_with_deps("B", &["ghost"])],
        ))
        .await;
    assert_eq!(result["status"], "error");
    assert!(result["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn resume_does_not_respawn_completed_steps() {
    let dir = tempdir().unwrap();
    let gateway = StubGateway::new();
    gateway.fail_label("B");
    let engine = engine(dir.path(), gateway.clone());

    let first = engine
        .run(WorkflowRequest {
            label: Some("restartable".to_string()),
            ..request(WorkflowPattern::Sequential, vec![step("A"), step("B")])
        })
        .await;
    assert_eq!(first["status"], "failed");
    assert!(checkpoint_path(dir.path(), "restartable").exists());

    gateway.heal_label("B");
    let second = engine
        .run(WorkflowRequest {
            label: Some("restartable".to_string()),
            resume: true,
            ..request(WorkflowPattern::Sequential, vec![step("A"), step("B")])
        })
        .await;

    assert_eq!(second["status"], "done");
    assert_eq!(second["stepsCompleted"], 2);
    assert_eq!(gateway.spawn_count("A"), 1);
    assert_eq!(gateway.spawn_count("B"), 2);
    assert!(!checkpoint_path(dir.path(), "restartable").exists());
}

#[tokio::test]
async fn silent_step_times_out_as_step_failure() {
    let dir = tempdir().unwrap();
    let gateway = StubGateway::with_silent(&["slow"]);
    let engine = engine(dir.path(), gateway);

    let mut slow = step("slow");
    slow.timeout_seconds = Some(1);
    let result = engine
        .run(request(WorkflowPattern::Sequential, vec![slow]))
        .await;

    assert_eq!(result["status"], "failed");
    assert_eq!(
        result["failures"]["slow"],
        "Step \"slow\" timed out after 1s with no result"
    );
}
