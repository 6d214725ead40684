//! Placeholder port implementations. A real backend crate (OS display
//! bindings, a virtual-display driver, a scheduled-task API) is out of scope
//! here; these exist so the coordinator is buildable and runnable end-to-end
//! while leaving an explicit seam for a real implementation to replace them.

use async_trait::async_trait;
use display_core::types::{ActiveTopology, DeviceId, Snapshot, SingleDisplayConfiguration};
use display_core::{ApplyStatus, DisplaySettingsPort, PlatformWorkaroundsPort, ScheduledTaskPort, VirtualDisplayPort};
use std::time::Duration;

#[derive(Default)]
pub struct UnavailableDisplaySettings;

#[async_trait]
impl DisplaySettingsPort for UnavailableDisplaySettings {
    async fn apply(&self, _config: &SingleDisplayConfiguration) -> ApplyStatus {
        ApplyStatus::HelperUnavailable
    }

    async fn apply_topology(&self, _topology: &ActiveTopology) -> ApplyStatus {
        ApplyStatus::HelperUnavailable
    }

    async fn enumerate(&self) -> Vec<DeviceId> {
        Vec::new()
    }

    async fn capture_topology(&self) -> ActiveTopology {
        Vec::new()
    }

    async fn validate_topology(&self, _topology: &ActiveTopology) -> bool {
        false
    }

    async fn capture_snapshot(&self) -> Snapshot {
        Snapshot::default()
    }

    async fn apply_snapshot(&self, _snapshot: &Snapshot) -> bool {
        false
    }

    async fn snapshot_matches_current(&self, _snapshot: &Snapshot) -> bool {
        false
    }

    async fn configuration_matches(&self, _config: &SingleDisplayConfiguration) -> bool {
        false
    }

    async fn set_display_origin(&self, _device_id: &str, _origin: (i64, i64)) -> bool {
        false
    }

    async fn compute_expected_topology(
        &self,
        _config: &SingleDisplayConfiguration,
        base_topology: Option<&ActiveTopology>,
    ) -> Option<ActiveTopology> {
        base_topology.cloned()
    }

    async fn is_topology_same(&self, lhs: &ActiveTopology, rhs: &ActiveTopology) -> bool {
        lhs == rhs
    }
}

#[derive(Default)]
pub struct UnavailableVirtualDisplay;

#[async_trait]
impl VirtualDisplayPort for UnavailableVirtualDisplay {
    async fn disable(&self) -> bool {
        false
    }

    async fn enable(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool {
        false
    }

    fn device_id(&self) -> String {
        String::new()
    }
}

#[derive(Default)]
pub struct NoopScheduledTask;

#[async_trait]
impl ScheduledTaskPort for NoopScheduledTask {
    async fn create_restore_task(&self, username: Option<&str>) -> bool {
        tracing::debug!(?username, "scheduled-task backend unavailable, skipping create");
        false
    }

    async fn delete_restore_task(&self) -> bool {
        false
    }

    async fn is_task_present(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct NoopPlatformWorkarounds;

#[async_trait]
impl PlatformWorkaroundsPort for NoopPlatformWorkarounds {
    async fn blank_hdr_states(&self, delay: Duration) {
        tracing::debug!(?delay, "platform workarounds backend unavailable, skipping HDR blank");
    }

    async fn refresh_shell(&self) {
        tracing::debug!("platform workarounds backend unavailable, skipping shell refresh");
    }
}
