//! Pure logic for the display-settings coordinator: state machine,
//! operations, snapshot ledger, and the capability ports the binary crate
//! implements. No OS bindings live here.

pub mod cancellation;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod operations;
pub mod policy;
pub mod ports;
pub mod reconnect;
pub mod snapshot;
pub mod state_machine;
pub mod types;

pub use cancellation::{CancellationSource, CancellationToken};
pub use clock::{Clock, FakeClock, SystemClock};
pub use dispatcher::AsyncDispatcher;
pub use error::CoreError;
pub use operations::{ApplyOperation, RecoveryOperation, RecoveryValidationOperation, VerificationOperation};
pub use policy::ApplyPolicy;
pub use ports::{DisplaySettingsPort, PlatformWorkaroundsPort, ScheduledTaskPort, VirtualDisplayPort};
pub use reconnect::{DebouncedTrigger, DisconnectGrace, HeartbeatMonitor, ReconnectController};
pub use snapshot::{
    FileSnapshotStorage, InMemorySnapshotStorage, SnapshotPaths, SnapshotPersistence, SnapshotService, SnapshotStorage,
};
pub use state_machine::{ApplyPipeline, RecoveryPipeline, SnapshotLedger, StateMachine, SystemPorts};
pub use types::*;
