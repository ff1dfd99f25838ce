//! Command execution
//!
//! Drains this node's pending work items from the store and advances each
//! through `pending -> in_progress -> completed | failed`. The claim is a
//! conditional update, so two agents racing on the same row execute its
//! action at most once between them. Execution itself sits behind
//! `CommandRunner`; swapping strategies does not touch the state machine.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command as SystemCommand;
use tracing::{debug, error, info};

use crate::errors::AgentError;
use crate::store::AgentStore;

/// A work item addressed to this node, as read from the `commands` table.
/// `status` stays in the store; the agent only ever moves it forward.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Command {
    pub id: i64,
    pub command_type: String,
    pub parameters: Option<String>,
}

/// Typed dispatch for the `command_type` column. Anything unrecognized
/// fails fast instead of being interpreted loosely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandType {
    KillProcess,
    Noop,
    Unknown(String),
}

impl From<&str> for CommandType {
    fn from(raw: &str) -> Self {
        match raw {
            "kill_process" => Self::KillProcess,
            "noop" => Self::Noop,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KillProcessParams {
    pid: u32,
}

/// Pluggable execution strategy for claimed commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &Command) -> Result<(), AgentError>;
}

/// Executes commands against the local system.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &Command) -> Result<(), AgentError> {
        match CommandType::from(command.command_type.as_str()) {
            CommandType::KillProcess => {
                let raw = command.parameters.as_deref().unwrap_or("{}");
                let params: KillProcessParams = serde_json::from_str(raw).map_err(|e| {
                    AgentError::Execution(format!("bad kill_process parameters {raw:?}: {e}"))
                })?;
                kill_process(params.pid).await
            }
            CommandType::Noop => {
                // connectivity probe: succeed after a short, fixed delay
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(())
            }
            CommandType::Unknown(other) => Err(AgentError::Execution(format!(
                "unknown command type {other:?}"
            ))),
        }
    }
}

async fn kill_process(pid: u32) -> Result<(), AgentError> {
    let output = SystemCommand::new("kill")
        .arg(pid.to_string())
        .output()
        .await
        .map_err(|e| AgentError::Execution(format!("failed to run kill: {e}")))?;
    if !output.status.success() {
        return Err(AgentError::Execution(format!(
            "kill {pid} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    info!(pid, "process killed");
    Ok(())
}

/// Drain this node's pending commands once. Store errors on one command are
/// logged and do not block the rest of the batch; a fetch error fails the
/// whole tick and is retried on the next one.
pub async fn process_commands(
    store: &dyn AgentStore,
    runner: &dyn CommandRunner,
    node: &str,
) -> Result<(), AgentError> {
    let pending = store.fetch_pending(node).await?;
    if !pending.is_empty() {
        debug!(node, count = pending.len(), "pending commands fetched");
    }
    for command in pending {
        if let Err(e) = execute_one(store, runner, &command).await {
            error!(command_id = command.id, error = %e, "command processing errored");
        }
    }
    Ok(())
}

async fn execute_one(
    store: &dyn AgentStore,
    runner: &dyn CommandRunner,
    command: &Command,
) -> Result<(), AgentError> {
    if !store.claim(command.id).await? {
        debug!(command_id = command.id, "command no longer pending, skipping");
        return Ok(());
    }
    info!(
        command_id = command.id,
        command_type = %command.command_type,
        "executing command"
    );
    match runner.run(command).await {
        Ok(()) => {
            store.complete(command.id).await?;
            info!(command_id = command.id, "command completed");
        }
        Err(e) => {
            // unrecoverable for this command: record the terminal state,
            // the error itself only lives in the log
            error!(command_id = command.id, error = %e, "command failed");
            store.fail(command.id).await?;
        }
    }
    Ok(())
}
