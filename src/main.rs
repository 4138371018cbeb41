//! MCP server for multi-agent coordination primitives.
//!
//! Exposes the task queue, message boards, knowledge store, session
//! templates, custom tools, and the workflow engine over stdio.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: ./orchestration.toml config, current directory as workspace
//! orchestration
//!
//! # Explicit config and workspace
//! orchestration --config /etc/agents/orchestration.toml --workspace /srv/agents
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rmcp::ServiceExt;
use tokio::io::{stdin, stdout};

use orchestration::config::Config;
use orchestration::gateway::{HttpGateway, DEFAULT_GATEWAY_URL};
use orchestration::registry::SubagentRegistry;
use orchestration::server::OrchestrationServer;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file (default: ./orchestration.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Workspace root for persistent state (overrides the config)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Gateway RPC endpoint (overrides the config)
    #[arg(long)]
    gateway_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orchestration=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(workspace) = args.workspace {
        config.workspace = Some(workspace);
    }
    if let Some(url) = args.gateway_url {
        config.gateway_url = Some(url);
    }
    let config = Arc::new(config);

    let gateway_url = config
        .gateway_url
        .clone()
        .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
    tracing::info!(
        agent = %config.agent_id,
        gateway = %gateway_url,
        "starting orchestration MCP server"
    );

    let gateway = Arc::new(HttpGateway::new(gateway_url));
    let registry = Arc::new(SubagentRegistry::new());
    let server = OrchestrationServer::new(config, gateway, registry);

    let service = server.serve((stdin(), stdout())).await?;
    service.waiting().await?;

    Ok(())
}
