//! Hardware telemetry collection
//!
//! Samples per-device GPU state and per-device process usage through a
//! `SensorSource`, so the production `nvidia-smi` backend can be swapped
//! for fixtures in tests. One sample is the unit of work of a telemetry
//! tick: all devices, each with the processes alive at that instant.

pub mod nvidia_smi;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::AgentError;

/// State of one GPU at one sampling instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub index: u32,
    pub name: String,
    pub uuid: String,
    pub memory_total_mb: u64,
    pub memory_used_mb: u64,
    pub memory_free_mb: u64,
    pub power_draw_watts: f64,
    pub power_limit_watts: f64,
    pub temperature_celsius: f64,
    pub utilization_gpu: f64,
    pub utilization_memory: f64,
    pub processes: Vec<ProcessSample>,
}

/// One process holding memory on a device at the sampling instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub process_name: String,
    pub user_name: String,
    pub used_memory_mb: u64,
}

impl ProcessSample {
    /// Share of the device's memory held by this process, in percent
    /// rounded to two decimals.
    pub fn utilization_of(&self, device_memory_total_mb: u64) -> f64 {
        if device_memory_total_mb == 0 {
            return 0.0;
        }
        let pct = self.used_memory_mb as f64 / device_memory_total_mb as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}

/// Source of device and process measurements.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// All current devices, without their process lists.
    async fn query_devices(&self) -> Result<Vec<DeviceSnapshot>, AgentError>;

    /// Processes currently running on one device.
    async fn query_processes(&self, device_index: u32) -> Result<Vec<ProcessSample>, AgentError>;
}

/// Collect one full sample: every device, each with its running processes.
///
/// A device-query failure fails the whole call. A failure collecting one
/// device's processes only loses that device's process list; the remaining
/// devices are still collected.
pub async fn collect_sample(sensor: &dyn SensorSource) -> Result<Vec<DeviceSnapshot>, AgentError> {
    let mut devices = sensor.query_devices().await?;
    for device in &mut devices {
        match sensor.query_processes(device.index).await {
            Ok(processes) => device.processes = processes,
            Err(e) => {
                warn!(
                    device = device.index,
                    uuid = %device.uuid,
                    error = %e,
                    "process collection failed, keeping device snapshot without processes"
                );
            }
        }
        debug!(
            device = device.index,
            uuid = %device.uuid,
            memory_used_mb = device.memory_used_mb,
            utilization = device.utilization_gpu,
            processes = device.processes.len(),
            "device sampled"
        );
    }
    Ok(devices)
}
