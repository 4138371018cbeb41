//! Workflow orchestration: sub-agent runs under sequential, parallel, or
//! DAG patterns, with on-disk checkpointing for crash recovery.

mod checkpoint;
mod engine;
mod types;

pub use checkpoint::{CheckpointStore, CHECKPOINTS_DIR};
pub use engine::WorkflowEngine;
pub use types::{
    StepFailure, StepOutcome, WorkflowCheckpoint, WorkflowPattern, WorkflowRequest,
    WorkflowResponse, WorkflowStatus, WorkflowStep, DEFAULT_STEP_TIMEOUT_SECS, WORKFLOW_SENTINEL,
};
