//! Subagent registry: process-scoped directory of live child runs.
//!
//! Tracks the spawn depth recorded for each session key and the set of
//! in-flight child runs, for depth and fan-out accounting. All mutations go
//! through one mutex; the registry owns no persistent state.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;

/// One in-flight child run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentRun {
    pub run_id: String,
    pub session_key: String,
    pub label: String,
    pub spawned_by: String,
    pub started_at: i64,
}

#[derive(Default)]
struct Inner {
    depths: HashMap<String, u32>,
    runs: HashMap<String, SubagentRun>,
}

#[derive(Default)]
pub struct SubagentRegistry {
    inner: Mutex<Inner>,
}

impl SubagentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicked holder cannot leave partial state here; recover the guard.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn depth recorded for a session key; unknown sessions are roots.
    pub fn depth_of(&self, session_key: &str) -> u32 {
        self.lock().depths.get(session_key).copied().unwrap_or(0)
    }

    pub fn set_depth(&self, session_key: &str, depth: u32) {
        self.lock().depths.insert(session_key.to_string(), depth);
    }

    pub fn register_run(&self, run: SubagentRun) {
        self.lock().runs.insert(run.run_id.clone(), run);
    }

    /// Drop a finished run, releasing its fan-out slot.
    pub fn finish_run(&self, run_id: &str) -> Option<SubagentRun> {
        let mut inner = self.lock();
        let run = inner.runs.remove(run_id);
        if let Some(run) = &run {
            inner.depths.remove(&run.session_key);
        }
        run
    }

    /// Number of live children spawned by the given session.
    pub fn active_children(&self, spawned_by: &str) -> usize {
        self.lock()
            .runs
            .values()
            .filter(|r| r.spawned_by == spawned_by)
            .count()
    }

    pub fn active_runs(&self) -> Vec<SubagentRun> {
        self.lock().runs.values().cloned().collect()
    }
}

pub fn new_run(run_id: &str, session_key: &str, label: &str, spawned_by: &str) -> SubagentRun {
    SubagentRun {
        run_id: run_id.to_string(),
        session_key: session_key.to_string(),
        label: label.to_string(),
        spawned_by: spawned_by.to_string(),
        started_at: Utc::now().timestamp_millis(),
    }
}
