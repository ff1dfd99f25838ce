//! gpu-node-agent - per-node GPU telemetry and command daemon
//!
//! Long-running agent for hosts in a shared GPU scheduler:
//! - samples device and process state via nvidia-smi on a fixed interval
//!   and upserts normalized snapshots into the shared MariaDB store
//! - polls the same store for commands addressed to this node and advances
//!   them through an explicit pending -> in_progress -> terminal lifecycle
//!
//! The two loops are independent; SIGINT/SIGTERM drains both.

mod commands;
mod config;
mod errors;
mod identity;
mod poller;
mod shutdown;
mod store;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::commands::SystemRunner;
use crate::config::AgentConfig;
use crate::poller::{run_command_loop, run_telemetry_loop, AgentContext};
use crate::shutdown::Shutdown;
use crate::store::mysql::MySqlStore;
use crate::telemetry::nvidia_smi::NvidiaSmi;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = AgentConfig::from_env().context("Failed to load configuration")?;
    init_tracing(&config);

    // without a node identity neither telemetry attribution nor command
    // targeting is well-defined, so this aborts startup
    let node_name = identity::resolve_node_name().context("Failed to resolve node name")?;
    info!(
        node = %node_name,
        interval_secs = config.poll_interval.as_secs(),
        "gpu-node-agent starting"
    );

    let store = MySqlStore::connect(&config.database_dsn)
        .await
        .context("Failed to connect to the scheduler store")?;

    let ctx = Arc::new(AgentContext {
        node_name,
        config,
        store: Arc::new(store),
        sensor: Arc::new(NvidiaSmi),
        runner: Arc::new(SystemRunner),
    });
    let shutdown = Shutdown::new();

    let telemetry = tokio::spawn(run_telemetry_loop(ctx.clone(), shutdown.clone()));
    let commands = tokio::spawn(run_command_loop(ctx.clone(), shutdown.clone()));

    wait_for_signal().await;
    info!("shutdown signal received, draining loops");
    shutdown.trigger();

    let _ = telemetry.await;
    let _ = commands.await;
    info!("gpu-node-agent stopped");
    Ok(())
}

fn init_tracing(config: &AgentConfig) {
    let default_filter = if config.verbose {
        "gpu_node_agent=debug,info"
    } else {
        "info"
    };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler, falling back to ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
