//! Checkpoint persistence under `<workspace>/checkpoints/`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::types::{WorkflowCheckpoint, WorkflowPattern, WorkflowStatus};
use crate::storage::{sanitize_name, StorageResult};

/// Directory under the workspace holding one file per labeled workflow.
pub const CHECKPOINTS_DIR: &str = "checkpoints";

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            dir: workspace.join(CHECKPOINTS_DIR),
        }
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("workflow-{}.json", sanitize_name(label)))
    }

    pub fn load(&self, label: &str) -> Option<WorkflowCheckpoint> {
        let raw = fs::read_to_string(self.path_for(label)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn save(&self, label: &str, checkpoint: &WorkflowCheckpoint) -> StorageResult<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(checkpoint)?;
        fs::write(self.path_for(label), json)?;
        Ok(())
    }

    /// Remove a checkpoint; called on successful completion.
    pub fn delete(&self, label: &str) {
        let _ = fs::remove_file(self.path_for(label));
    }

    /// Adopt an existing checkpoint when resuming and its step sequence
    /// exactly matches the request; otherwise start fresh. Returns the
    /// checkpoint and whether it was adopted.
    pub fn adopt(
        &self,
        label: &str,
        workflow_id: &str,
        pattern: WorkflowPattern,
        step_names: &[String],
        resume: bool,
    ) -> (WorkflowCheckpoint, bool) {
        if resume {
            if let Some(mut existing) = self.load(label) {
                if existing.steps == step_names {
                    info!(
                        label,
                        completed = existing.completed.len(),
                        "resuming from checkpoint"
                    );
                    existing.status = WorkflowStatus::InProgress;
                    existing.touch();
                    return (existing, true);
                }
            }
        }
        (WorkflowCheckpoint::new(workflow_id, pattern, step_names), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::StepOutcome;
    use tempfile::tempdir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_path_sanitizes_label() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let path = store.path_for("deploy to prod!");
        assert!(path.ends_with("checkpoints/workflow-deploy_to_prod_.json"));
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let cp = WorkflowCheckpoint::new("wf", WorkflowPattern::Sequential, &names(&["a"]));

        store.save("run", &cp).unwrap();
        let loaded = store.load("run").unwrap();
        assert_eq!(loaded.workflow_id, "wf");

        store.delete("run");
        assert!(store.load("run").is_none());
        store.delete("run"); // absence is fine
    }

    #[test]
    fn test_adopt_requires_matching_steps() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut cp = WorkflowCheckpoint::new("wf", WorkflowPattern::Sequential, &names(&["a", "b"]));
        cp.completed.insert(
            "a".to_string(),
            StepOutcome {
                result: "a-ok".to_string(),
                duration_ms: 1,
            },
        );
        cp.status = WorkflowStatus::Failed;
        store.save("run", &cp).unwrap();

        // Same sequence: adopted, with status reset to in_progress.
        let (adopted, resumed) =
            store.adopt("run", "new-id", WorkflowPattern::Sequential, &names(&["a", "b"]), true);
        assert!(resumed);
        assert_eq!(adopted.workflow_id, "wf");
        assert_eq!(adopted.status, WorkflowStatus::InProgress);
        assert!(adopted.completed.contains_key("a"));

        // Different sequence: fresh checkpoint.
        let (fresh, resumed) =
            store.adopt("run", "new-id", WorkflowPattern::Sequential, &names(&["a", "c"]), true);
        assert!(!resumed);
        assert_eq!(fresh.workflow_id, "new-id");
        assert!(fresh.completed.is_empty());

        // resume=false never adopts.
        let (fresh, resumed) =
            store.adopt("run", "new-id", WorkflowPattern::Sequential, &names(&["a", "b"]), false);
        assert!(!resumed);
        assert!(fresh.completed.is_empty());
    }
}
