//! In-memory store double for tests, mirroring the backend's keying and
//! conditional-update semantics over plain maps.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::AgentStore;
use crate::commands::Command;
use crate::errors::AgentError;
use crate::telemetry::DeviceSnapshot;

#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub uuid: String,
    pub name: String,
    pub utilization: f64,
    pub memory_utilization: f64,
    pub memory_used_mb: u64,
    pub memory_available_mb: u64,
    pub power_usage_watts: f64,
    pub temperature_celsius: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProcessRow {
    pub gpu_uuid: String,
    pub pid: u32,
    pub process_name: String,
    pub user_name: String,
    pub gpu_utilization: f64,
    pub used_memory_mb: u64,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CommandRow {
    target_node: String,
    command_type: String,
    parameters: Option<String>,
    status: String,
}

#[derive(Default)]
struct Inner {
    devices: HashMap<(String, u32), DeviceRow>,
    processes: Vec<ProcessRow>,
    commands: HashMap<i64, CommandRow>,
    history: HashMap<i64, Vec<String>>,
    failing_devices: HashSet<u32>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write for the given device index fail.
    pub fn fail_device_writes(&self, device_index: u32) {
        self.inner.lock().failing_devices.insert(device_index);
    }

    pub fn seed_command(&self, id: i64, node: &str, command_type: &str, parameters: Option<&str>) {
        self.inner.lock().commands.insert(
            id,
            CommandRow {
                target_node: node.to_string(),
                command_type: command_type.to_string(),
                parameters: parameters.map(str::to_string),
                status: "pending".to_string(),
            },
        );
    }

    pub fn device_rows(&self) -> HashMap<(String, u32), DeviceRow> {
        self.inner.lock().devices.clone()
    }

    pub fn process_rows(&self) -> Vec<ProcessRow> {
        self.inner.lock().processes.clone()
    }

    pub fn command_status(&self, id: i64) -> Option<String> {
        self.inner.lock().commands.get(&id).map(|c| c.status.clone())
    }

    /// Every status the command passed through, in transition order.
    pub fn status_history(&self, id: i64) -> Vec<String> {
        self.inner.lock().history.get(&id).cloned().unwrap_or_default()
    }

    fn transition(&self, id: i64, from: &str, to: &str) -> bool {
        let mut inner = self.inner.lock();
        let updated = match inner.commands.get_mut(&id) {
            Some(row) if row.status == from => {
                row.status = to.to_string();
                true
            }
            _ => false,
        };
        if updated {
            inner.history.entry(id).or_default().push(to.to_string());
        }
        updated
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn upsert_device(
        &self,
        node: &str,
        device: &DeviceSnapshot,
        observed_at: DateTime<Utc>,
    ) -> Result<(), AgentError> {
        let mut inner = self.inner.lock();
        if inner.failing_devices.contains(&device.index) {
            return Err(AgentError::StoreWrite(format!(
                "injected failure for device {}",
                device.index
            )));
        }
        inner.devices.insert(
            (node.to_string(), device.index),
            DeviceRow {
                uuid: device.uuid.clone(),
                name: device.name.clone(),
                utilization: device.utilization_gpu,
                memory_utilization: device.utilization_memory,
                memory_used_mb: device.memory_used_mb,
                memory_available_mb: device.memory_free_mb,
                power_usage_watts: device.power_draw_watts,
                temperature_celsius: device.temperature_celsius,
                updated_at: observed_at,
            },
        );
        Ok(())
    }

    async fn record_processes(
        &self,
        device: &DeviceSnapshot,
        observed_at: DateTime<Utc>,
    ) -> Result<(), AgentError> {
        let mut inner = self.inner.lock();
        if inner.failing_devices.contains(&device.index) {
            return Err(AgentError::StoreWrite(format!(
                "injected failure for device {}",
                device.index
            )));
        }
        for process in &device.processes {
            let row = ProcessRow {
                gpu_uuid: device.uuid.clone(),
                pid: process.pid,
                process_name: process.process_name.clone(),
                user_name: process.user_name.clone(),
                gpu_utilization: process.utilization_of(device.memory_total_mb),
                used_memory_mb: process.used_memory_mb,
                reported_at: observed_at,
            };
            inner.processes.push(row);
        }
        Ok(())
    }

    async fn fetch_pending(&self, node: &str) -> Result<Vec<Command>, AgentError> {
        let inner = self.inner.lock();
        let mut pending: Vec<Command> = inner
            .commands
            .iter()
            .filter(|(_, row)| row.target_node == node && row.status == "pending")
            .map(|(id, row)| Command {
                id: *id,
                command_type: row.command_type.clone(),
                parameters: row.parameters.clone(),
            })
            .collect();
        pending.sort_by_key(|c| c.id);
        Ok(pending)
    }

    async fn claim(&self, command_id: i64) -> Result<bool, AgentError> {
        Ok(self.transition(command_id, "pending", "in_progress"))
    }

    async fn complete(&self, command_id: i64) -> Result<(), AgentError> {
        self.transition(command_id, "in_progress", "completed");
        Ok(())
    }

    async fn fail(&self, command_id: i64) -> Result<(), AgentError> {
        self.transition(command_id, "in_progress", "failed");
        Ok(())
    }
}
