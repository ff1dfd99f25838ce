//! Persistence against the shared scheduler store
//!
//! The store is the only resource shared by the two polling loops and the
//! sole source of truth: the agent keeps no durable local state. Device
//! rows are written with single-statement upserts so a repeated or
//! abandoned tick simply overwrites the same keys.

pub mod mysql;

#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::commands::Command;
use crate::errors::AgentError;
use crate::telemetry::DeviceSnapshot;

/// Operations both loops need from the shared store.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Insert-or-update the measurement row for one device, keyed by
    /// `(server_name, gpu_number)`. Must be a single idempotent statement,
    /// never an existence check followed by a write.
    async fn upsert_device(
        &self,
        node: &str,
        device: &DeviceSnapshot,
        observed_at: DateTime<Utc>,
    ) -> Result<(), AgentError>;

    /// Record the device's process rows for this sampling instant, keyed
    /// by `(gpu_uuid, process_id, reported_at)`.
    async fn record_processes(
        &self,
        device: &DeviceSnapshot,
        observed_at: DateTime<Utc>,
    ) -> Result<(), AgentError>;

    /// Commands addressed to this node still in `pending` state.
    async fn fetch_pending(&self, node: &str) -> Result<Vec<Command>, AgentError>;

    /// Conditional `pending -> in_progress` transition. Returns `false`
    /// when the row was no longer pending (another agent won the race).
    async fn claim(&self, command_id: i64) -> Result<bool, AgentError>;

    /// `in_progress -> completed`.
    async fn complete(&self, command_id: i64) -> Result<(), AgentError>;

    /// `in_progress -> failed`.
    async fn fail(&self, command_id: i64) -> Result<(), AgentError>;
}

/// Persist one tick's sample, best-effort per device: a failure writing one
/// device's rows is logged and does not prevent attempting the next device.
pub async fn sync_snapshot(
    store: &dyn AgentStore,
    node: &str,
    devices: &[DeviceSnapshot],
    observed_at: DateTime<Utc>,
) {
    for device in devices {
        if let Err(e) = store.upsert_device(node, device, observed_at).await {
            error!(node, device = device.index, uuid = %device.uuid, error = %e, "device upsert failed");
            continue;
        }
        if let Err(e) = store.record_processes(device, observed_at).await {
            error!(node, device = device.index, uuid = %device.uuid, error = %e, "process rows write failed");
            continue;
        }
        debug!(node, device = device.index, "device snapshot persisted");
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use crate::telemetry::testing::{device, process};

    #[tokio::test]
    async fn test_upsert_twice_leaves_one_row_with_second_values() {
        let store = MemoryStore::new();
        let node = "node-a";
        let snap = device(0, "GPU-aaa", 12.0);

        store.upsert_device(node, &snap, Utc::now()).await.unwrap();

        let mut updated = snap.clone();
        updated.utilization_gpu = 97.0;
        updated.memory_used_mb = 30000;
        let second_ts = Utc::now();
        store.upsert_device(node, &updated, second_ts).await.unwrap();

        let rows = store.device_rows();
        assert_eq!(rows.len(), 1);
        let row = &rows[&(node.to_string(), 0)];
        assert_eq!(row.utilization, 97.0);
        assert_eq!(row.memory_used_mb, 30000);
        assert_eq!(row.updated_at, second_ts);
    }

    #[tokio::test]
    async fn test_sync_snapshot_isolates_device_write_failures() {
        let store = MemoryStore::new();
        store.fail_device_writes(0);

        let mut first = device(0, "GPU-aaa", 12.0);
        first.processes = vec![process(1, "alice", 100)];
        let second = device(1, "GPU-bbb", 3.0);

        sync_snapshot(&store, "node-a", &[first, second], Utc::now()).await;

        let rows = store.device_rows();
        assert_eq!(rows.len(), 1);
        assert!(rows.contains_key(&("node-a".to_string(), 1)));
        // the failing device's process rows were not written either
        assert!(store.process_rows().is_empty());
    }

    #[tokio::test]
    async fn test_sync_snapshot_writes_derived_process_utilization() {
        let store = MemoryStore::new();
        let mut snap = device(0, "GPU-aaa", 12.0);
        snap.processes = vec![process(4242, "alice", 1000)];

        sync_snapshot(&store, "node-a", &[snap], Utc::now()).await;

        let processes = store.process_rows();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].gpu_uuid, "GPU-aaa");
        assert_eq!(processes[0].pid, 4242);
        // 1000 / 40960 * 100, rounded to two decimals
        assert_eq!(processes[0].gpu_utilization, 2.44);
    }
}
