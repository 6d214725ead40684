//! Domain types shared across the state machine, operations, and ports.
//!
//! The core treats a [`SingleDisplayConfiguration`] as mostly opaque: it
//! parses the handful of fields recovery and verification need to reason
//! about, and passes the rest through to the display-settings port
//! untouched. The port, not the core, owns the full configuration schema.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type DeviceId = String;

/// An ordered sequence of clone/duplicate groups; each group is a non-empty
/// sequence of device ids.
pub type ActiveTopology = Vec<Vec<DeviceId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePrepMode {
    Disabled,
    VerifyOnly,
    EnsureActive,
    EnsurePrimary,
    EnsureOnlyDisplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefreshRate {
    Decimal(f64),
    Rational { numerator: u32, denominator: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HdrState {
    #[serde(rename = "on")]
    Enabled,
    #[serde(rename = "off")]
    Disabled,
}

/// A single-display configuration request. A parse failure upstream (in
/// `display-protocol`) is a rejectable input, never represented here — by
/// the time one of these exists, it parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleDisplayConfiguration {
    pub device_id: DeviceId,
    pub device_prep: DevicePrepMode,
    pub resolution: Option<Resolution>,
    pub refresh_rate: Option<RefreshRate>,
    pub hdr_state: Option<HdrState>,
}

/// Per-device display mode recorded in a [`Snapshot`]. Field names match the
/// on-disk schema directly (`w`/`h`/`num`/`den`) rather than the nested
/// `Resolution` shape used elsewhere, since this is what actually gets
/// written to the snapshot JSON files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayMode {
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
    #[serde(rename = "num")]
    pub refresh_rate_numerator: u32,
    #[serde(rename = "den")]
    pub refresh_rate_denominator: u32,
}

/// A point-in-time record of topology + per-device mode + per-device HDR
/// state + primary device. Structural equality (derived `PartialEq`) is the
/// spec's snapshot-equality relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub topology: ActiveTopology,
    pub modes: BTreeMap<DeviceId, DisplayMode>,
    /// Absent key = "device does not support/expose HDR" is represented the
    /// same as an explicit `None` value, matching the spec's equivalence
    /// rule — callers that care about the distinction should not rely on
    /// key presence.
    #[serde(rename = "hdr")]
    pub hdr_states: BTreeMap<DeviceId, Option<HdrState>>,
    #[serde(rename = "primary")]
    pub primary_device: DeviceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SnapshotTier {
    Current,
    Previous,
    Golden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Proceed,
    Retry,
    ResetVirtualDisplay,
    SkipToNextTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    Ok,
    HelperUnavailable,
    InvalidRequest,
    VerificationFailed,
    NeedsVirtualDisplayReset,
    Retryable,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Apply,
    Revert,
    Disarm,
    ExportGolden,
    SnapshotCurrent,
    Reset,
    Ping,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Waiting,
    InProgress,
    Verification,
    Recovery,
    RecoveryValidation,
    EventLoop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    DisplayChange,
    PowerResume,
    DeviceArrival,
    DeviceRemoval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperEvent {
    HeartbeatTimeout,
}

/// A request bundled from an inbound `Apply` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyRequest {
    pub configuration: Option<SingleDisplayConfiguration>,
    pub topology: Option<ActiveTopology>,
    pub monitor_positions: Vec<(DeviceId, (i64, i64))>,
    pub hdr_blank: bool,
    pub prefer_golden_first: bool,
    pub virtual_layout: Option<String>,
    /// Device ids to exclude from future snapshot captures, carried as the
    /// `sunshine_snapshot_exclude_devices` extension field. Persists as the
    /// machine's snapshot blacklist once this request is accepted, the same
    /// way an explicit `ExportGolden`/`SnapshotCurrent` payload would.
    pub snapshot_exclude_devices: Option<Vec<DeviceId>>,
}

/// Device ids to exclude from a captured snapshot (`ExportGolden` /
/// `SnapshotCurrent`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotCommandPayload {
    pub exclude_devices: Vec<DeviceId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    pub status: Option<ApplyStatus>,
    pub expected_topology: Option<ActiveTopology>,
    pub virtual_display_requested: bool,
}

impl ApplyOutcome {
    pub fn fatal() -> Self {
        Self {
            status: Some(ApplyStatus::Fatal),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub snapshot: Option<Snapshot>,
}

/// Every external and internal event that can reach the state machine.
/// Each carries the cancellation generation it was issued under, fencing it
/// against work superseded by a later command.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Apply {
        request: ApplyRequest,
        generation: u64,
    },
    Revert {
        generation: u64,
    },
    Disarm {
        generation: u64,
    },
    ExportGolden {
        payload: SnapshotCommandPayload,
        generation: u64,
    },
    SnapshotCurrent {
        payload: SnapshotCommandPayload,
        generation: u64,
    },
    Reset {
        generation: u64,
    },
    Ping {
        generation: u64,
    },
    Stop {
        generation: u64,
    },
    ApplyCompleted {
        status: ApplyStatus,
        expected_topology: Option<ActiveTopology>,
        virtual_display_requested: bool,
        generation: u64,
    },
    VerificationCompleted {
        success: bool,
        generation: u64,
    },
    RecoveryCompleted {
        success: bool,
        snapshot: Option<Snapshot>,
        generation: u64,
    },
    RecoveryValidationCompleted {
        success: bool,
        generation: u64,
    },
    DisplayEvent {
        event: DisplayEvent,
        generation: u64,
    },
    HelperEvent {
        event: HelperEvent,
        generation: u64,
    },
}

/// One entry in the state machine's transition log, handed to an optional
/// observer for diagnostics/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: State,
    pub to: State,
    pub trigger: ApplyAction,
    pub result_status: Option<ApplyStatus>,
}
