//! Capability ports (spec §1, §2): every OS-level side effect the core
//! needs is expressed as a small async trait. Concrete implementations are
//! out of scope here — `display-helper` wires a placeholder until a real
//! backend crate is plugged in.

use crate::types::{ActiveTopology, DeviceId, Snapshot, SingleDisplayConfiguration};
use async_trait::async_trait;
use std::time::Duration;

/// Apply config, apply topology, enumerate devices, capture/apply/compare
/// snapshots, compute expected topology, validate topology.
#[async_trait]
pub trait DisplaySettingsPort: Send + Sync {
    async fn apply(&self, config: &SingleDisplayConfiguration) -> crate::types::ApplyStatus;
    async fn apply_topology(&self, topology: &ActiveTopology) -> crate::types::ApplyStatus;
    async fn enumerate(&self) -> Vec<DeviceId>;
    async fn capture_topology(&self) -> ActiveTopology;
    async fn validate_topology(&self, topology: &ActiveTopology) -> bool;
    async fn capture_snapshot(&self) -> Snapshot;
    async fn apply_snapshot(&self, snapshot: &Snapshot) -> bool;
    async fn snapshot_matches_current(&self, snapshot: &Snapshot) -> bool;
    async fn configuration_matches(&self, config: &SingleDisplayConfiguration) -> bool;
    async fn set_display_origin(&self, device_id: &str, origin: (i64, i64)) -> bool;
    async fn compute_expected_topology(
        &self,
        config: &SingleDisplayConfiguration,
        base_topology: Option<&ActiveTopology>,
    ) -> Option<ActiveTopology>;
    async fn is_topology_same(&self, lhs: &ActiveTopology, rhs: &ActiveTopology) -> bool;
}

/// Disable/enable/probe the virtual display.
#[async_trait]
pub trait VirtualDisplayPort: Send + Sync {
    async fn disable(&self) -> bool;
    async fn enable(&self) -> bool;
    async fn is_available(&self) -> bool;
    fn device_id(&self) -> String;
}

/// Create/delete/query a logon-triggered restore task. `username` is a
/// best-effort label the binary may pass through; the core never resolves
/// identity itself (spec §9).
#[async_trait]
pub trait ScheduledTaskPort: Send + Sync {
    async fn create_restore_task(&self, username: Option<&str>) -> bool;
    async fn delete_restore_task(&self) -> bool;
    async fn is_task_present(&self) -> bool;
}

/// HDR-blank nudge; shell/topology refresh broadcast.
#[async_trait]
pub trait PlatformWorkaroundsPort: Send + Sync {
    async fn blank_hdr_states(&self, delay: Duration);
    async fn refresh_shell(&self);
}
