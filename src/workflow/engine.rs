//! Workflow engine: spawns sub-agent sessions under sequential, parallel,
//! or DAG patterns, checkpointing after every state change.
//!
//! Each step gets a fresh child session. The engine patches the child's
//! spawn depth (required) and model (best-effort), fires the `agent` run,
//! then polls the session history until the last assistant message carries
//! text or the step deadline passes. Step failures are absorbed into the
//! checkpoint; only machinery faults (checkpoint writes) abort a run, and
//! those are recorded under the `_workflow` sentinel so `resume` still works.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::checkpoint::CheckpointStore;
use super::types::{
    StepFailure, StepOutcome, WorkflowCheckpoint, WorkflowPattern, WorkflowRequest,
    WorkflowResponse, WorkflowStatus, WorkflowStep, WORKFLOW_SENTINEL,
};
use crate::config::Config;
use crate::gateway::{patch_session, session_history, spawn_agent, AgentSpawn, Gateway};
use crate::registry::{self, SubagentRegistry};
use crate::storage::StorageResult;

/// Sleep between history polls while a step is in flight.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// How many trailing messages to fetch per poll.
const HISTORY_POLL_LIMIT: u32 = 5;

/// Slack added on top of the step timeout for the `agent` gateway call.
const SPAWN_TIMEOUT_SLACK_MS: u64 = 30_000;

pub struct WorkflowEngine {
    gateway: Arc<dyn Gateway>,
    registry: Arc<SubagentRegistry>,
    checkpoints: CheckpointStore,
    agent_id: String,
    caller_key: String,
    default_model: String,
    max_spawn_depth: u32,
    max_children: usize,
}

impl WorkflowEngine {
    pub fn new(
        config: &Config,
        gateway: Arc<dyn Gateway>,
        registry: Arc<SubagentRegistry>,
        workspace: &Path,
    ) -> Self {
        Self {
            gateway,
            registry,
            checkpoints: CheckpointStore::new(workspace),
            agent_id: config.agent_id.clone(),
            caller_key: config.main_session_key(),
            default_model: config.agents.defaults.model.qualified(),
            max_spawn_depth: config.agents.max_spawn_depth,
            max_children: config.agents.max_children_per_agent,
        }
    }

    /// Run a workflow to a settled state and return the aggregate result
    /// record. Never returns a transport-level error.
    pub async fn run(&self, req: WorkflowRequest) -> Value {
        if let Some(rejection) = self.admit(&req) {
            return rejection;
        }

        let step_names: Vec<String> = req.steps.iter().map(|s| s.name.clone()).collect();
        let workflow_id = Uuid::new_v4().to_string();
        let label = req.label.clone().unwrap_or_else(|| workflow_id.clone());
        let caller_depth = self.registry.depth_of(&self.caller_key);

        let (mut checkpoint, resumed) =
            self.checkpoints
                .adopt(&label, &workflow_id, req.pattern, &step_names, req.resume);
        if resumed {
            // A machinery fault from the previous run is not a step result.
            checkpoint.failed.remove(WORKFLOW_SENTINEL);
        }
        info!(
            workflow = %checkpoint.workflow_id,
            pattern = %req.pattern,
            steps = step_names.len(),
            resumed,
            "workflow starting"
        );

        let executed = match req.pattern {
            WorkflowPattern::Sequential => {
                self.run_sequential(&req, &label, &mut checkpoint, caller_depth).await
            }
            WorkflowPattern::Parallel => {
                self.run_parallel(&req, &label, &mut checkpoint, caller_depth).await
            }
            WorkflowPattern::Dag => {
                self.run_dag(&req, &label, &mut checkpoint, caller_depth).await
            }
        };
        if let Err(err) = executed {
            checkpoint
                .failed
                .insert(WORKFLOW_SENTINEL.to_string(), StepFailure { error: err.to_string() });
        }

        checkpoint.status = if !checkpoint.failed.is_empty() {
            WorkflowStatus::Failed
        } else if step_names.iter().all(|n| checkpoint.completed.contains_key(n)) {
            WorkflowStatus::Done
        } else {
            // No failures recorded but progress is stuck.
            WorkflowStatus::Failed
        };
        checkpoint.touch();
        if checkpoint.status == WorkflowStatus::Done {
            self.checkpoints.delete(&label);
        } else if let Err(err) = self.checkpoints.save(&label, &checkpoint) {
            warn!(label = %label, %err, "failed to persist final checkpoint");
        }
        info!(
            workflow = %checkpoint.workflow_id,
            status = ?checkpoint.status,
            completed = checkpoint.completed.len(),
            failed = checkpoint.failed.len(),
            "workflow settled"
        );

        self.assemble(&req, &label, &step_names, checkpoint)
    }

    /// Validation and admission. Returns the rejection record, if any.
    fn admit(&self, req: &WorkflowRequest) -> Option<Value> {
        if req.steps.is_empty() {
            return Some(validation("workflow requires at least one step"));
        }
        let mut names = HashSet::new();
        for step in &req.steps {
            if !names.insert(step.name.as_str()) {
                return Some(validation(format!("duplicate step name: {}", step.name)));
            }
        }
        if req.pattern == WorkflowPattern::Dag {
            for step in &req.steps {
                for dep in step.deps() {
                    if !names.contains(dep.as_str()) {
                        return Some(validation(format!(
                            "step \"{}\" depends on unknown step \"{dep}\"",
                            step.name
                        )));
                    }
                }
            }
        }

        let caller_depth = self.registry.depth_of(&self.caller_key);
        if caller_depth >= self.max_spawn_depth {
            return Some(json!({
                "status": "forbidden",
                "error": format!(
                    "spawn depth {caller_depth} has reached the limit of {}",
                    self.max_spawn_depth
                ),
            }));
        }
        if req.pattern == WorkflowPattern::Parallel && req.steps.len() > self.max_children {
            return Some(json!({
                "status": "forbidden",
                "error": format!(
                    "parallel workflow of {} steps exceeds the fan-out limit of {}",
                    req.steps.len(),
                    self.max_children
                ),
            }));
        }
        None
    }

    async fn run_sequential(
        &self,
        req: &WorkflowRequest,
        label: &str,
        checkpoint: &mut WorkflowCheckpoint,
        caller_depth: u32,
    ) -> StorageResult<()> {
        for step in &req.steps {
            if checkpoint.completed.contains_key(&step.name) {
                continue;
            }
            let context = if req.pass_context {
                context_sections(&req.steps, &checkpoint.completed, None)
            } else {
                String::new()
            };
            let outcome = self.execute_step(step, &context, caller_depth).await;
            let failed = outcome.is_err();
            record(checkpoint, step.name.clone(), outcome);
            checkpoint.touch();
            self.checkpoints.save(label, checkpoint)?;
            if failed {
                // Stop on first failure; later steps stay unstarted.
                return Ok(());
            }
        }
        Ok(())
    }

    async fn run_parallel(
        &self,
        req: &WorkflowRequest,
        label: &str,
        checkpoint: &mut WorkflowCheckpoint,
        caller_depth: u32,
    ) -> StorageResult<()> {
        let runs = req
            .steps
            .iter()
            .filter(|step| !checkpoint.completed.contains_key(&step.name))
            .map(|step| async move {
                (step.name.clone(), self.execute_step(step, "", caller_depth).await)
            });
        for (name, outcome) in join_all(runs).await {
            record(checkpoint, name, outcome);
        }
        checkpoint.touch();
        self.checkpoints.save(label, checkpoint)?;
        Ok(())
    }

    async fn run_dag(
        &self,
        req: &WorkflowRequest,
        label: &str,
        checkpoint: &mut WorkflowCheckpoint,
        caller_depth: u32,
    ) -> StorageResult<()> {
        // Each round runs every step whose dependencies are all completed,
        // so an acyclic graph settles in at most |steps| rounds. Steps
        // downstream of a failure never become ready and stay unstarted.
        for _round in 0..req.steps.len() {
            let ready: Vec<&WorkflowStep> = req
                .steps
                .iter()
                .filter(|step| {
                    !checkpoint.completed.contains_key(&step.name)
                        && !checkpoint.failed.contains_key(&step.name)
                        && step.deps().iter().all(|d| checkpoint.completed.contains_key(d))
                })
                .collect();
            if ready.is_empty() {
                break;
            }

            let runs = ready.into_iter().map(|step| {
                let context = if req.pass_context {
                    context_sections(&req.steps, &checkpoint.completed, Some(step.deps()))
                } else {
                    String::new()
                };
                async move {
                    (step.name.clone(), self.execute_step(step, &context, caller_depth).await)
                }
            });
            for (name, outcome) in join_all(runs).await {
                record(checkpoint, name, outcome);
            }
            checkpoint.touch();
            self.checkpoints.save(label, checkpoint)?;
        }
        Ok(())
    }

    /// Spawn one child session, run the step, and poll for its reply.
    async fn execute_step(
        &self,
        step: &WorkflowStep,
        context: &str,
        caller_depth: u32,
    ) -> Result<StepOutcome, String> {
        let child_key = format!("agent:{}:workflow:{}", self.agent_id, Uuid::new_v4());
        let child_depth = caller_depth + 1;
        let timeout_secs = step.timeout_secs();
        let started = Instant::now();

        patch_session(
            self.gateway.as_ref(),
            json!({ "key": &child_key, "spawnDepth": child_depth }),
        )
        .await
        .map_err(|err| format!("failed to prepare session for step \"{}\": {err}", step.name))?;

        let model = step.model.clone().unwrap_or_else(|| self.default_model.clone());
        if let Err(err) = patch_session(
            self.gateway.as_ref(),
            json!({ "key": &child_key, "model": model }),
        )
        .await
        {
            warn!(step = %step.name, %err, "model patch failed, child keeps its default");
        }

        let full_task = if context.is_empty() {
            step.task.clone()
        } else {
            format!(
                "## Context from prior workflow steps\n\n{context}\n\n---\n\n## Your task\n\n{}",
                step.task
            )
        };
        let spawn = AgentSpawn {
            message: full_task,
            session_key: child_key.clone(),
            channel: None,
            to: None,
            account_id: None,
            idempotency_key: Uuid::new_v4().to_string(),
            deliver: false,
            lane: "subagent".to_string(),
            extra_system_prompt: None,
            thinking: step.thinking.clone(),
            timeout: timeout_secs,
            label: step.name.clone(),
            spawned_by: self.caller_key.clone(),
        };
        let run_id = spawn_agent(
            self.gateway.as_ref(),
            &spawn,
            timeout_secs * 1000 + SPAWN_TIMEOUT_SLACK_MS,
        )
        .await
        .map_err(|err| format!("spawn failed for step \"{}\": {err}", step.name))?;

        self.registry.set_depth(&child_key, child_depth);
        self.registry
            .register_run(registry::new_run(&run_id, &child_key, &step.name, &self.caller_key));
        debug!(step = %step.name, session = %child_key, run = %run_id, "step spawned");

        let reply = self.poll_for_reply(step, &child_key, timeout_secs).await;
        self.registry.finish_run(&run_id);

        match reply {
            Some(result) => Ok(StepOutcome {
                result,
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            None => Err(format!(
                "Step \"{}\" timed out after {timeout_secs}s with no result",
                step.name
            )),
        }
    }

    /// Poll session history until the last assistant message carries text or
    /// the deadline passes. Transient poll failures are swallowed.
    async fn poll_for_reply(
        &self,
        step: &WorkflowStep,
        child_key: &str,
        timeout_secs: u64,
    ) -> Option<String> {
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            if Instant::now() >= deadline {
                return None;
            }
            match session_history(self.gateway.as_ref(), child_key, HISTORY_POLL_LIMIT).await {
                Ok(messages) => {
                    let reply = messages
                        .iter()
                        .rev()
                        .find(|m| m.role == "assistant")
                        .and_then(|m| m.body());
                    if let Some(text) = reply {
                        return Some(text.to_string());
                    }
                }
                Err(err) => {
                    debug!(step = %step.name, %err, "history poll failed, retrying");
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn assemble(
        &self,
        req: &WorkflowRequest,
        label: &str,
        step_names: &[String],
        checkpoint: WorkflowCheckpoint,
    ) -> Value {
        let total_duration_ms = checkpoint.completed.values().map(|o| o.duration_ms).sum();
        let results = if req.merge.as_deref() == Some("merge") {
            let mut map = Map::new();
            for name in step_names {
                if let Some(outcome) = checkpoint.completed.get(name) {
                    map.insert(name.clone(), Value::String(outcome.result.clone()));
                }
            }
            Value::Object(map)
        } else {
            let sections: Vec<String> = step_names
                .iter()
                .filter_map(|name| {
                    checkpoint
                        .completed
                        .get(name)
                        .map(|o| format!("## {name}\n\n{}", o.result))
                })
                .collect();
            Value::String(sections.join("\n\n---\n\n"))
        };

        let failures: BTreeMap<String, String> = checkpoint
            .failed
            .iter()
            .map(|(name, failure)| (name.clone(), failure.error.clone()))
            .collect();
        let response = WorkflowResponse {
            status: checkpoint.status,
            pattern: checkpoint.pattern,
            steps_completed: checkpoint.completed.len(),
            steps_failed: checkpoint.failed.len(),
            total_steps: step_names.len(),
            total_duration_ms,
            results,
            failures: (!failures.is_empty()).then_some(failures),
            checkpoint: (checkpoint.status != WorkflowStatus::Done)
                .then(|| self.checkpoints.path_for(label).display().to_string()),
        };
        serde_json::to_value(&response).unwrap_or_else(|err| {
            json!({ "status": "error", "error": format!("unencodable workflow result: {err}") })
        })
    }
}

fn record(
    checkpoint: &mut WorkflowCheckpoint,
    name: String,
    outcome: Result<StepOutcome, String>,
) {
    match outcome {
        Ok(done) => {
            // A step re-run after a resumed failure moves back to completed.
            checkpoint.failed.remove(&name);
            checkpoint.completed.insert(name, done);
        }
        Err(error) => {
            checkpoint.failed.insert(name, StepFailure { error });
        }
    }
}

/// `### <name>` sections for completed steps, in workflow order. When `only`
/// is given, restrict to those names (a DAG step's dependencies).
fn context_sections(
    steps: &[WorkflowStep],
    completed: &BTreeMap<String, StepOutcome>,
    only: Option<&[String]>,
) -> String {
    steps
        .iter()
        .filter(|step| only.is_none_or(|names| names.contains(&step.name)))
        .filter_map(|step| {
            completed
                .get(&step.name)
                .map(|outcome| format!("### {}\n{}", step.name, outcome.result))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn validation(message: impl Into<String>) -> Value {
    json!({ "status": "error", "error": message.into() })
}
