use thiserror::Error;

/// Failure taxonomy for the agent.
///
/// Only `SystemLookup` during startup (hostname resolution) is fatal; every
/// other variant is scoped to a single tick, row, or command and is logged
/// by the owning loop rather than propagated out of it.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("system lookup failed: {0}")]
    SystemLookup(String),
    #[error("sensor tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("malformed sensor output: {0}")]
    MalformedOutput(String),
    #[error("store read failed: {0}")]
    StoreRead(String),
    #[error("store write failed: {0}")]
    StoreWrite(String),
    #[error("command execution failed: {0}")]
    Execution(String),
}
