//! Task queue: priority FIFO with a claim/complete/fail state machine and
//! bounded retry.
//!
//! Tasks move through four states:
//!
//! ```text
//! add → pending ──claim──▶ claimed ──complete──▶ done
//!          ▲                  │
//!          │   retries+1 < maxRetries
//!          ├──────fail────────┤
//!          │                  │   retries+1 ≥ maxRetries
//!          │                  └──────fail──────▶ failed
//!          └───────────────retry◀───────────────┘
//! ```
//!
//! The failure decision is made after incrementing `retries`, so
//! `maxRetries = 0` fails on the first failure. A manual `retry` requeues a
//! failed task without resetting its retry count.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::storage::{DocumentStore, StorageResult};

/// Queue document filename under the workspace root.
pub const QUEUE_FILE: &str = ".task-queue.json";

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_LIST_LIMIT: usize = 20;
const DEFAULT_CLEAR_HOURS: f64 = 24.0;

/// Claim ordering: high before normal before low, ties broken by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Done,
    Failed,
}

/// A queued unit of work. `data` and `result` are opaque payloads preserved
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub retries: u32,
    pub max_retries: u32,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// The persisted queue: insertion-ordered task records.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct QueueDocument {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Request record for the `task_queue` tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskQueueRequest {
    #[schemars(description = "One of: add, claim, complete, fail, retry, list, stats, clear")]
    pub action: String,
    #[schemars(description = "Task description (add)")]
    pub task: Option<String>,
    #[schemars(description = "Opaque payload stored with the task (add)")]
    pub data: Option<Value>,
    #[schemars(description = "Priority: high, normal, or low (add; default normal)")]
    pub priority: Option<Priority>,
    #[schemars(description = "Failures allowed before the task is marked failed (add; default 3)")]
    pub max_retries: Option<u32>,
    #[schemars(description = "Free-form tags (add)")]
    pub tags: Option<Vec<String>>,
    #[schemars(description = "Task id (complete, fail, retry)")]
    pub id: Option<String>,
    #[schemars(description = "Result payload recorded on completion (complete)")]
    pub result: Option<Value>,
    #[schemars(description = "Error message recorded on failure (fail)")]
    pub error: Option<String>,
    #[schemars(description = "Status filter (list)")]
    pub status: Option<TaskStatus>,
    #[schemars(description = "Maximum tasks returned (list; default 20)")]
    pub limit: Option<usize>,
    #[schemars(description = "Age cutoff in hours for clearing finished tasks (clear; default 24)")]
    pub older_than_hours: Option<f64>,
}

/// Persistent priority queue over `.task-queue.json`.
pub struct TaskQueue {
    doc: DocumentStore<QueueDocument>,
}

impl TaskQueue {
    pub fn new(workspace: &Path) -> Self {
        Self {
            doc: DocumentStore::new(workspace.join(QUEUE_FILE)),
        }
    }

    pub async fn execute(&self, req: TaskQueueRequest) -> StorageResult<Value> {
        match req.action.as_str() {
            "add" => self.add(req).await,
            "claim" => self.claim().await,
            "complete" => self.complete(req).await,
            "fail" => self.fail(req).await,
            "retry" => self.retry(req).await,
            "list" => self.list(req).await,
            "stats" => self.stats().await,
            "clear" => self.clear(req).await,
            other => Ok(error_result(format!("unknown action: {other}"))),
        }
    }

    async fn add(&self, req: TaskQueueRequest) -> StorageResult<Value> {
        let Some(description) = req.task.filter(|t| !t.trim().is_empty()) else {
            return Ok(error_result("add requires a task description"));
        };
        let now = Utc::now().timestamp_millis();
        let task = Task {
            id: short_id(),
            task: description,
            data: req.data,
            priority: req.priority.unwrap_or(Priority::Normal),
            status: TaskStatus::Pending,
            retries: 0,
            max_retries: req.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            created_at: now,
            updated_at: now,
            claimed_at: None,
            completed_at: None,
            result: None,
            error: None,
            tags: req.tags,
        };
        let id = task.id.clone();
        self.doc.update(|doc| doc.tasks.push(task)).await?;
        Ok(json!({ "status": "added", "id": id }))
    }

    /// Claim the best pending task: lowest priority rank, then oldest.
    async fn claim(&self) -> StorageResult<Value> {
        self.doc
            .update(|doc| {
                let best = doc
                    .tasks
                    .iter_mut()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .min_by_key(|t| (t.priority.rank(), t.created_at));
                match best {
                    Some(task) => {
                        let now = Utc::now().timestamp_millis();
                        task.status = TaskStatus::Claimed;
                        task.claimed_at = Some(now);
                        task.updated_at = now;
                        json!({ "status": "claimed", "task": task })
                    }
                    None => json!({ "status": "empty" }),
                }
            })
            .await
    }

    async fn complete(&self, req: TaskQueueRequest) -> StorageResult<Value> {
        let Some(id) = req.id else {
            return Ok(error_result("complete requires an id"));
        };
        let result = req.result;
        self.doc
            .update(|doc| {
                let Some(task) = doc.tasks.iter_mut().find(|t| t.id == id) else {
                    return json!({ "status": "not_found", "id": id });
                };
                if task.status != TaskStatus::Claimed {
                    return invalid_state(&id, task.status, "claimed");
                }
                let now = Utc::now().timestamp_millis();
                task.status = TaskStatus::Done;
                task.completed_at = Some(now);
                task.updated_at = now;
                task.result = result;
                json!({ "status": "completed", "id": id })
            })
            .await
    }

    async fn fail(&self, req: TaskQueueRequest) -> StorageResult<Value> {
        let Some(id) = req.id else {
            return Ok(error_result("fail requires an id"));
        };
        let error = req.error.unwrap_or_else(|| "unknown error".to_string());
        self.doc
            .update(|doc| {
                let Some(task) = doc.tasks.iter_mut().find(|t| t.id == id) else {
                    return json!({ "status": "not_found", "id": id });
                };
                if task.status != TaskStatus::Claimed {
                    return invalid_state(&id, task.status, "claimed");
                }
                let now = Utc::now().timestamp_millis();
                task.retries += 1;
                task.updated_at = now;
                task.error = Some(error);
                if task.retries < task.max_retries {
                    task.status = TaskStatus::Pending;
                    task.claimed_at = None;
                    json!({ "status": "retrying", "id": id, "retries": task.retries })
                } else {
                    task.status = TaskStatus::Failed;
                    json!({ "status": "failed", "id": id, "retries": task.retries })
                }
            })
            .await
    }

    /// Requeue a failed task. The retry count is deliberately not reset, so
    /// a task that fails again goes straight back to `failed`.
    async fn retry(&self, req: TaskQueueRequest) -> StorageResult<Value> {
        let Some(id) = req.id else {
            return Ok(error_result("retry requires an id"));
        };
        self.doc
            .update(|doc| {
                let Some(task) = doc.tasks.iter_mut().find(|t| t.id == id) else {
                    return json!({ "status": "not_found", "id": id });
                };
                if task.status != TaskStatus::Failed {
                    return invalid_state(&id, task.status, "failed");
                }
                task.status = TaskStatus::Pending;
                task.error = None;
                task.claimed_at = None;
                task.updated_at = Utc::now().timestamp_millis();
                json!({ "status": "requeued", "id": id, "retries": task.retries })
            })
            .await
    }

    async fn list(&self, req: TaskQueueRequest) -> StorageResult<Value> {
        let limit = req.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let doc = self.doc.read().await;
        let mut tasks: Vec<&Task> = doc
            .tasks
            .iter()
            .filter(|t| req.status.is_none_or(|s| t.status == s))
            .collect();
        tasks.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        tasks.truncate(limit);
        Ok(json!({ "status": "ok", "count": tasks.len(), "tasks": tasks }))
    }

    async fn stats(&self) -> StorageResult<Value> {
        let doc = self.doc.read().await;
        let count = |status: TaskStatus| doc.tasks.iter().filter(|t| t.status == status).count();
        Ok(json!({
            "status": "ok",
            "total": doc.tasks.len(),
            "pending": count(TaskStatus::Pending),
            "claimed": count(TaskStatus::Claimed),
            "done": count(TaskStatus::Done),
            "failed": count(TaskStatus::Failed),
        }))
    }

    /// Drop finished tasks older than the cutoff. Pending and claimed tasks
    /// are always retained.
    async fn clear(&self, req: TaskQueueRequest) -> StorageResult<Value> {
        let hours = req.older_than_hours.unwrap_or(DEFAULT_CLEAR_HOURS);
        let cutoff = Utc::now().timestamp_millis() - (hours * 3_600_000.0) as i64;
        self.doc
            .update(|doc| {
                let before = doc.tasks.len();
                doc.tasks.retain(|t| {
                    !matches!(t.status, TaskStatus::Done | TaskStatus::Failed)
                        || t.updated_at >= cutoff
                });
                json!({ "status": "cleared", "removed": before - doc.tasks.len() })
            })
            .await
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn error_result(message: impl Into<String>) -> Value {
    json!({ "status": "error", "error": message.into() })
}

fn invalid_state(id: &str, actual: TaskStatus, expected: &str) -> Value {
    let actual = serde_json::to_value(actual).unwrap_or(Value::Null);
    json!({
        "status": "invalid_state",
        "id": id,
        "error": format!("task is {}, expected {expected}", actual.as_str().unwrap_or("?")),
    })
}
