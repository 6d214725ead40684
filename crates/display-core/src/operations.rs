//! The four operations the async dispatcher can run: apply, verify,
//! recover, recover-validate (spec §4.2, §4.3, §4.8, and the
//! recovery-validation operation named in §2's component table).

use crate::cancellation::CancellationToken;
use crate::clock::Clock;
use crate::policy::ApplyPolicy;
use crate::ports::DisplaySettingsPort;
use crate::snapshot::{SnapshotPersistence, SnapshotService};
use crate::types::{ApplyOutcome, ApplyRequest, ApplyStatus, DeviceId, RecoveryOutcome, Snapshot};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub struct ApplyOperation {
    display: Arc<dyn DisplaySettingsPort>,
}

impl ApplyOperation {
    pub fn new(display: Arc<dyn DisplaySettingsPort>) -> Self {
        Self { display }
    }

    pub async fn run(&self, request: &ApplyRequest, token: &CancellationToken) -> ApplyOutcome {
        let mut outcome = ApplyOutcome {
            virtual_display_requested: request.virtual_layout.is_some(),
            ..Default::default()
        };

        if token.is_cancelled() {
            outcome.status = Some(ApplyStatus::Fatal);
            return outcome;
        }

        let Some(configuration) = &request.configuration else {
            outcome.status = Some(ApplyStatus::InvalidRequest);
            return outcome;
        };

        outcome.expected_topology = match &request.topology {
            Some(topology) => Some(topology.clone()),
            None => {
                self.display
                    .compute_expected_topology(configuration, request.topology.as_ref())
                    .await
            }
        };

        if let Some(topology) = &request.topology {
            let topology_status = self.display.apply_topology(topology).await;
            if topology_status != ApplyStatus::Ok {
                outcome.status = Some(topology_status);
                return outcome;
            }
        }

        outcome.status = Some(self.display.apply(configuration).await);

        for (device_id, origin) in &request.monitor_positions {
            if !device_id.is_empty() {
                // Failures here are logged but never change the outcome
                // status (spec §4.2 step 6).
                let applied = self.display.set_display_origin(device_id, *origin).await;
                if !applied {
                    tracing::warn!(device_id, "failed to set monitor origin");
                }
            }
        }

        outcome
    }
}

pub struct VerificationOperation {
    display: Arc<dyn DisplaySettingsPort>,
    clock: Arc<dyn Clock>,
}

impl VerificationOperation {
    pub fn new(display: Arc<dyn DisplaySettingsPort>, clock: Arc<dyn Clock>) -> Self {
        Self { display, clock }
    }

    pub async fn run(
        &self,
        request: &ApplyRequest,
        expected_topology: Option<&crate::types::ActiveTopology>,
        token: &CancellationToken,
    ) -> bool {
        if token.is_cancelled() {
            return false;
        }

        self.clock.sleep(Duration::from_millis(250)).await;

        if token.is_cancelled() {
            return false;
        }

        if let Some(expected_topology) = expected_topology {
            let current = self.display.capture_topology().await;
            if !self.display.is_topology_same(expected_topology, &current).await {
                return false;
            }
        }

        if let Some(configuration) = &request.configuration {
            if !self.display.configuration_matches(configuration).await {
                return false;
            }
        }

        true
    }
}

pub struct RecoveryOperation {
    display: Arc<dyn DisplaySettingsPort>,
    snapshot_service: Arc<SnapshotService>,
    snapshot_persistence: Arc<SnapshotPersistence>,
    apply_policy: Arc<ApplyPolicy>,
    clock: Arc<dyn Clock>,
}

impl RecoveryOperation {
    pub fn new(
        display: Arc<dyn DisplaySettingsPort>,
        snapshot_service: Arc<SnapshotService>,
        snapshot_persistence: Arc<SnapshotPersistence>,
        apply_policy: Arc<ApplyPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            display,
            snapshot_service,
            snapshot_persistence,
            apply_policy,
            clock,
        }
    }

    pub async fn run(&self, token: &CancellationToken) -> RecoveryOutcome {
        let available = self.available_devices().await;

        for tier in self.snapshot_persistence.recovery_order() {
            if token.is_cancelled() {
                return RecoveryOutcome::default();
            }

            let Some(snapshot) = self.snapshot_persistence.load(tier, &available) else {
                continue;
            };

            if !self.snapshot_service.validate(&snapshot).await {
                continue;
            }

            if let Some(outcome) = self.attempt_tier(&snapshot, token).await {
                return outcome;
            }
        }

        RecoveryOutcome::default()
    }

    /// Up to two attempts against one tier's snapshot. `Some` means the
    /// caller should stop walking tiers (either success, or cancellation);
    /// `None` means move on to the next tier.
    async fn attempt_tier(&self, snapshot: &Snapshot, token: &CancellationToken) -> Option<RecoveryOutcome> {
        for attempt in 0..2 {
            if token.is_cancelled() {
                return Some(RecoveryOutcome::default());
            }

            let status = self.snapshot_service.apply(snapshot, token).await;
            if status != ApplyStatus::Ok {
                if self.apply_policy.should_skip_tier(status) {
                    return None;
                }
                if attempt == 0 {
                    self.clock.sleep(Duration::from_millis(300)).await;
                    continue;
                }
                return None;
            }

            self.clock.sleep(Duration::from_millis(250)).await;

            if token.is_cancelled() {
                return Some(RecoveryOutcome::default());
            }

            if self.snapshot_service.matches_current(snapshot).await {
                return Some(RecoveryOutcome {
                    success: true,
                    snapshot: Some(snapshot.clone()),
                });
            }

            if attempt == 0 {
                self.clock.sleep(Duration::from_millis(300)).await;
            }
        }

        None
    }

    async fn available_devices(&self) -> BTreeSet<DeviceId> {
        self.display
            .enumerate()
            .await
            .into_iter()
            .filter(|id| !id.is_empty())
            .collect()
    }
}

pub struct RecoveryValidationOperation {
    snapshot_service: Arc<SnapshotService>,
    clock: Arc<dyn Clock>,
}

impl RecoveryValidationOperation {
    pub fn new(snapshot_service: Arc<SnapshotService>, clock: Arc<dyn Clock>) -> Self {
        Self { snapshot_service, clock }
    }

    pub async fn run(&self, snapshot: &Snapshot, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }

        self.clock.sleep(Duration::from_millis(250)).await;

        if token.is_cancelled() {
            return false;
        }

        self.snapshot_service.matches_current(snapshot).await
    }
}
