//! Coordination and orchestration primitives for a multi-agent runtime.
//!
//! This crate fronts one agent with an MCP server exposing:
//!
//! - a persistent **task queue** with priority scheduling and bounded retry
//! - **message boards**: append-only logs with time-cursor reads
//! - a **knowledge store**: category/key CRUD with partial-match query
//! - **session templates** applied to gateway sessions
//! - **custom tools**: user-declared HTTP endpoints and scripts
//! - a **workflow engine** spawning sub-agent sessions under sequential,
//!   parallel, or DAG patterns, with checkpoint/resume
//!
//! All persistent state lives as JSON documents and JSONL logs under one
//! workspace root. Sessions themselves are owned by an external gateway
//! process reached over RPC; see [`gateway`].

pub mod board;
pub mod config;
pub mod custom;
pub mod gateway;
pub mod knowledge;
pub mod queue;
pub mod registry;
pub mod server;
pub mod storage;
pub mod templates;
pub mod workflow;
pub mod workspace;

pub use config::Config;
pub use gateway::{Gateway, GatewayError, HttpGateway};
pub use registry::SubagentRegistry;
pub use server::OrchestrationServer;
pub use workflow::{WorkflowEngine, WorkflowRequest};
