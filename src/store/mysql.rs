//! MariaDB/MySQL store backend (sqlx)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};

use super::AgentStore;
use crate::commands::Command;
use crate::errors::AgentError;
use crate::telemetry::DeviceSnapshot;

const UPSERT_DEVICE: &str = r#"
INSERT INTO real_time_usage
    (gpu_uuid, gpu_name, server_name, gpu_number, utilization, memory_utilization,
     memory_used_mb, memory_available_mb, power_usage_watts, temperature_celsius, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON DUPLICATE KEY UPDATE
    gpu_uuid = VALUES(gpu_uuid),
    gpu_name = VALUES(gpu_name),
    utilization = VALUES(utilization),
    memory_utilization = VALUES(memory_utilization),
    memory_used_mb = VALUES(memory_used_mb),
    memory_available_mb = VALUES(memory_available_mb),
    power_usage_watts = VALUES(power_usage_watts),
    temperature_celsius = VALUES(temperature_celsius),
    updated_at = VALUES(updated_at)
"#;

const INSERT_PROCESS: &str = r#"
INSERT INTO gpu_processes
    (gpu_uuid, process_id, process_name, user_name, gpu_utilization, used_gpu_memory, reported_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_PENDING: &str =
    "SELECT id, command_type, parameters FROM commands WHERE target_node = ? AND status = 'pending'";

const CLAIM_COMMAND: &str =
    "UPDATE commands SET status = 'in_progress' WHERE id = ? AND status = 'pending'";

const COMPLETE_COMMAND: &str =
    "UPDATE commands SET status = 'completed' WHERE id = ? AND status = 'in_progress'";

const FAIL_COMMAND: &str =
    "UPDATE commands SET status = 'failed' WHERE id = ? AND status = 'in_progress'";

/// Store backend over a sqlx connection pool. The pool is safe for
/// concurrent use by both polling loops.
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connect and verify the connection before any loop starts.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .connect(dsn)
            .await
            .context("Failed to open store connection pool")?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("Store did not answer ping")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl AgentStore for MySqlStore {
    async fn upsert_device(
        &self,
        node: &str,
        device: &DeviceSnapshot,
        observed_at: DateTime<Utc>,
    ) -> Result<(), AgentError> {
        sqlx::query(UPSERT_DEVICE)
            .bind(&device.uuid)
            .bind(&device.name)
            .bind(node)
            .bind(device.index)
            .bind(device.utilization_gpu)
            .bind(device.utilization_memory)
            .bind(device.memory_used_mb)
            .bind(device.memory_free_mb)
            .bind(device.power_draw_watts)
            .bind(device.temperature_celsius)
            .bind(observed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| AgentError::StoreWrite(e.to_string()))?;
        Ok(())
    }

    async fn record_processes(
        &self,
        device: &DeviceSnapshot,
        observed_at: DateTime<Utc>,
    ) -> Result<(), AgentError> {
        for process in &device.processes {
            sqlx::query(INSERT_PROCESS)
                .bind(&device.uuid)
                .bind(process.pid)
                .bind(&process.process_name)
                .bind(&process.user_name)
                .bind(process.utilization_of(device.memory_total_mb))
                .bind(process.used_memory_mb)
                .bind(observed_at)
                .execute(&self.pool)
                .await
                .map_err(|e| AgentError::StoreWrite(e.to_string()))?;
        }
        Ok(())
    }

    async fn fetch_pending(&self, node: &str) -> Result<Vec<Command>, AgentError> {
        sqlx::query_as::<_, Command>(SELECT_PENDING)
            .bind(node)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AgentError::StoreRead(e.to_string()))
    }

    async fn claim(&self, command_id: i64) -> Result<bool, AgentError> {
        let result = sqlx::query(CLAIM_COMMAND)
            .bind(command_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AgentError::StoreWrite(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, command_id: i64) -> Result<(), AgentError> {
        sqlx::query(COMPLETE_COMMAND)
            .bind(command_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AgentError::StoreWrite(e.to_string()))?;
        Ok(())
    }

    async fn fail(&self, command_id: i64) -> Result<(), AgentError> {
        sqlx::query(FAIL_COMMAND)
            .bind(command_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AgentError::StoreWrite(e.to_string()))?;
        Ok(())
    }
}
