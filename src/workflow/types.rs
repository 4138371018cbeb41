//! Workflow records: steps, patterns, and the on-disk checkpoint document.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Step timeout when the step declares none.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 600;

/// Failures that happen in the engine itself rather than in a step are
/// recorded in the checkpoint under this name.
pub const WORKFLOW_SENTINEL: &str = "_workflow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPattern {
    Sequential,
    Parallel,
    Dag,
}

impl std::fmt::Display for WorkflowPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Dag => write!(f, "dag"),
        }
    }
}

/// One sub-agent step. `depends_on` is only meaningful under the DAG
/// pattern and must name other steps of the same workflow.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub name: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl WorkflowStep {
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_seconds.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS)
    }

    pub fn deps(&self) -> &[String] {
        self.depends_on.as_deref().unwrap_or(&[])
    }
}

/// Request record for the `workflow` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    #[schemars(description = "Execution pattern: sequential, parallel, or dag")]
    pub pattern: WorkflowPattern,
    #[schemars(description = "Steps to run; names must be unique")]
    pub steps: Vec<WorkflowStep>,
    #[schemars(description = "Feed completed step results into later steps as context")]
    #[serde(default)]
    pub pass_context: bool,
    #[schemars(description = "Set to \"merge\" for a name→result object instead of joined text")]
    #[serde(default)]
    pub merge: Option<String>,
    #[schemars(description = "Stable label; names the checkpoint file and enables resume")]
    #[serde(default)]
    pub label: Option<String>,
    #[schemars(description = "Adopt a matching checkpoint instead of starting fresh")]
    #[serde(default)]
    pub resume: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    InProgress,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub result: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    pub error: String,
}

/// Persistent progress record, sufficient to resume after a crash.
///
/// A step name never appears in both `completed` and `failed`; `done` means
/// every step completed, and the checkpoint file is deleted on that terminal
/// state and retained on every other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCheckpoint {
    pub workflow_id: String,
    pub pattern: WorkflowPattern,
    pub steps: Vec<String>,
    #[serde(default)]
    pub completed: BTreeMap<String, StepOutcome>,
    #[serde(default)]
    pub failed: BTreeMap<String, StepFailure>,
    pub status: WorkflowStatus,
    pub started_at: i64,
    pub updated_at: i64,
}

impl WorkflowCheckpoint {
    pub fn new(workflow_id: &str, pattern: WorkflowPattern, steps: &[String]) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            workflow_id: workflow_id.to_string(),
            pattern,
            steps: steps.to_vec(),
            completed: BTreeMap::new(),
            failed: BTreeMap::new(),
            status: WorkflowStatus::InProgress,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp_millis();
    }
}

/// Aggregate returned to the caller once the run settles.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResponse {
    pub status: WorkflowStatus,
    pub pattern: WorkflowPattern,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub total_steps: usize,
    pub total_duration_ms: u64,
    pub results: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
}
