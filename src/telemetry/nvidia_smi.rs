//! `nvidia-smi` backed sensor
//!
//! Invokes the tool with a fixed, ordered field list in delimited
//! header-free output and parses it line by line. Shape errors (wrong
//! field count) fail the whole call; individual numeric fields that do not
//! parse fall back to zero so one glitched reading cannot blank a tick.

use async_trait::async_trait;
use std::str::FromStr;
use tokio::process::Command;
use tracing::debug;

use super::{DeviceSnapshot, ProcessSample, SensorSource};
use crate::errors::AgentError;

const DEVICE_QUERY_ARG: &str = "--query-gpu=index,name,uuid,memory.total,memory.used,\
memory.free,power.draw,power.limit,temperature.gpu,utilization.gpu,utilization.memory";
const PROCESS_QUERY_ARG: &str = "--query-compute-apps=pid,process_name,used_gpu_memory";
const FORMAT_ARG: &str = "--format=csv,noheader,nounits";

const DEVICE_FIELDS: usize = 11;
const PROCESS_FIELDS: usize = 3;

/// Production sensor reading GPU state from `nvidia-smi`.
pub struct NvidiaSmi;

impl NvidiaSmi {
    async fn run(args: &[&str]) -> Result<String, AgentError> {
        let output = Command::new("nvidia-smi")
            .args(args)
            .output()
            .await
            .map_err(|e| AgentError::ToolUnavailable(format!("failed to run nvidia-smi: {e}")))?;
        if !output.status.success() {
            return Err(AgentError::ToolUnavailable(format!(
                "nvidia-smi exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SensorSource for NvidiaSmi {
    async fn query_devices(&self) -> Result<Vec<DeviceSnapshot>, AgentError> {
        let out = Self::run(&[DEVICE_QUERY_ARG, FORMAT_ARG]).await?;
        parse_device_output(&out)
    }

    async fn query_processes(&self, device_index: u32) -> Result<Vec<ProcessSample>, AgentError> {
        let id_arg = format!("--id={device_index}");
        let out = Self::run(&[PROCESS_QUERY_ARG, FORMAT_ARG, &id_arg]).await?;

        let mut samples = Vec::new();
        for line in out.lines().filter(|l| !l.trim().is_empty()) {
            let (pid, process_name, used_memory_mb) = parse_process_line(line)?;
            let user_name = process_user(pid).await?;
            debug!(pid, process = %process_name, user = %user_name, used_memory_mb, "process sampled");
            samples.push(ProcessSample {
                pid,
                process_name,
                user_name,
                used_memory_mb,
            });
        }
        Ok(samples)
    }
}

/// Owning user of a pid, via `ps`. Empty output means the process is gone
/// or unreadable and is treated as a lookup failure.
async fn process_user(pid: u32) -> Result<String, AgentError> {
    let output = Command::new("ps")
        .args(["-o", "user=", "-p", &pid.to_string()])
        .output()
        .await
        .map_err(|e| AgentError::SystemLookup(format!("failed to run ps for pid {pid}: {e}")))?;
    if !output.status.success() {
        return Err(AgentError::SystemLookup(format!(
            "ps exited with {} for pid {pid}",
            output.status
        )));
    }
    let user = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if user.is_empty() {
        return Err(AgentError::SystemLookup(format!("no user found for pid {pid}")));
    }
    Ok(user)
}

/// Tolerant numeric parse: `nvidia-smi` reports `[N/A]` or garbage for some
/// fields on some boards; those become zero instead of failing the sample.
fn num<T: FromStr + Default>(field: &str) -> T {
    field.trim().parse().unwrap_or_default()
}

fn parse_device_output(out: &str) -> Result<Vec<DeviceSnapshot>, AgentError> {
    out.lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_device_line)
        .collect()
}

fn parse_device_line(line: &str) -> Result<DeviceSnapshot, AgentError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != DEVICE_FIELDS {
        return Err(AgentError::MalformedOutput(format!(
            "expected {DEVICE_FIELDS} device fields, got {} in {line:?}",
            fields.len()
        )));
    }
    Ok(DeviceSnapshot {
        index: num(fields[0]),
        name: fields[1].trim().to_string(),
        uuid: fields[2].trim().to_string(),
        memory_total_mb: num(fields[3]),
        memory_used_mb: num(fields[4]),
        memory_free_mb: num(fields[5]),
        power_draw_watts: num(fields[6]),
        power_limit_watts: num(fields[7]),
        temperature_celsius: num(fields[8]),
        utilization_gpu: num(fields[9]),
        utilization_memory: num(fields[10]),
        processes: Vec::new(),
    })
}

fn parse_process_line(line: &str) -> Result<(u32, String, u64), AgentError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != PROCESS_FIELDS {
        return Err(AgentError::MalformedOutput(format!(
            "expected {PROCESS_FIELDS} process fields, got {} in {line:?}",
            fields.len()
        )));
    }
    Ok((num(fields[0]), fields[1].trim().to_string(), num(fields[2])))
}
