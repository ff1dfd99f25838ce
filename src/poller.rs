//! Poll scheduler
//!
//! Two independent fixed-interval loops over one shared store handle: the
//! telemetry tick samples devices and upserts the snapshot, the command
//! tick drains pending work for this node. A tick body failure is logged
//! and skipped; only the shutdown handle ends a loop.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::commands::{process_commands, CommandRunner};
use crate::config::AgentConfig;
use crate::errors::AgentError;
use crate::shutdown::Shutdown;
use crate::store::{sync_snapshot, AgentStore};
use crate::telemetry::{collect_sample, SensorSource};

/// Everything the loops need, constructed once at startup and shared.
pub struct AgentContext {
    pub node_name: String,
    pub config: AgentConfig,
    pub store: Arc<dyn AgentStore>,
    pub sensor: Arc<dyn SensorSource>,
    pub runner: Arc<dyn CommandRunner>,
}

pub async fn run_telemetry_loop(ctx: Arc<AgentContext>, shutdown: Arc<Shutdown>) {
    info!(node = %ctx.node_name, "telemetry loop started");
    while !shutdown.is_triggered() {
        if let Err(e) = telemetry_tick(&ctx).await {
            error!(node = %ctx.node_name, error = %e, "telemetry tick failed, skipping");
        }
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(ctx.config.poll_interval) => {}
        }
    }
    info!(node = %ctx.node_name, "telemetry loop stopped");
}

pub async fn run_command_loop(ctx: Arc<AgentContext>, shutdown: Arc<Shutdown>) {
    info!(node = %ctx.node_name, "command loop started");
    while !shutdown.is_triggered() {
        if let Err(e) = command_tick(&ctx).await {
            error!(node = %ctx.node_name, error = %e, "command tick failed, skipping");
        }
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(ctx.config.poll_interval) => {}
        }
    }
    info!(node = %ctx.node_name, "command loop stopped");
}

async fn telemetry_tick(ctx: &AgentContext) -> Result<(), AgentError> {
    let devices = collect_sample(ctx.sensor.as_ref()).await?;
    let observed_at = Utc::now();
    sync_snapshot(ctx.store.as_ref(), &ctx.node_name, &devices, observed_at).await;
    debug!(node = %ctx.node_name, devices = devices.len(), "telemetry tick done");
    Ok(())
}

async fn command_tick(ctx: &AgentContext) -> Result<(), AgentError> {
    process_commands(ctx.store.as_ref(), ctx.runner.as_ref(), &ctx.node_name).await
}
