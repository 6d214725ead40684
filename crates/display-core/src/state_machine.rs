//! The state machine (spec §4.9): single-threaded consumer of messages,
//! serializing every transition the coordinator can make.

use crate::cancellation::{CancellationSource, CancellationToken};
use crate::dispatcher::AsyncDispatcher;
use crate::policy::ApplyPolicy;
use crate::ports::{PlatformWorkaroundsPort, ScheduledTaskPort};
use crate::reconnect::HeartbeatMonitor;
use crate::snapshot::{SnapshotPersistence, SnapshotService};
use crate::types::{
    ActiveTopology, ApplyAction, ApplyRequest, ApplyStatus, DeviceId, Message, PolicyDecision, Snapshot,
    SnapshotTier, State, StateTransition,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Bundles the small capability ports the state machine itself calls
/// directly (as opposed to the ones only the operations need).
pub struct SystemPorts {
    workarounds: Arc<dyn PlatformWorkaroundsPort>,
    task_manager: Arc<dyn ScheduledTaskPort>,
    heartbeat: Arc<HeartbeatMonitor>,
    clock: Arc<dyn crate::clock::Clock>,
    cancellation: CancellationSource,
}

impl SystemPorts {
    pub fn new(
        workarounds: Arc<dyn PlatformWorkaroundsPort>,
        task_manager: Arc<dyn ScheduledTaskPort>,
        heartbeat: Arc<HeartbeatMonitor>,
        clock: Arc<dyn crate::clock::Clock>,
        cancellation: CancellationSource,
    ) -> Self {
        Self {
            workarounds,
            task_manager,
            heartbeat,
            clock,
            cancellation,
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.cancellation.current_generation()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancellation.token()
    }

    pub fn cancel_operations(&self) {
        self.cancellation.cancel();
    }

    pub fn arm_heartbeat(&self) {
        self.heartbeat.arm();
    }

    pub fn disarm_heartbeat(&self) {
        self.heartbeat.disarm();
    }

    pub fn record_ping(&self) {
        self.heartbeat.record_ping();
    }

    pub async fn refresh_shell(&self) {
        self.workarounds.refresh_shell().await;
    }

    pub async fn blank_hdr_states(&self, delay: Duration) {
        self.workarounds.blank_hdr_states(delay).await;
    }

    /// The restore-task username is a port-level concern (spec §9); the
    /// core passes `None` and leaves identity resolution to the binary.
    pub async fn create_restore_task(&self) {
        let _ = self.task_manager.create_restore_task(None).await;
    }

    pub async fn delete_restore_task(&self) {
        let _ = self.task_manager.delete_restore_task().await;
    }
}

/// Drives apply/verify dispatches and folds their completions back into
/// state-machine messages.
pub struct ApplyPipeline {
    dispatcher: Arc<AsyncDispatcher>,
    policy: Arc<ApplyPolicy>,
    system: Arc<SystemPorts>,
    enqueue: mpsc::UnboundedSender<Message>,
}

impl ApplyPipeline {
    pub fn new(
        dispatcher: Arc<AsyncDispatcher>,
        policy: Arc<ApplyPolicy>,
        system: Arc<SystemPorts>,
        enqueue: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            dispatcher,
            policy,
            system,
            enqueue,
        }
    }

    pub fn maybe_reset_virtual_display(&self, status: ApplyStatus, virtual_display_requested: bool) -> PolicyDecision {
        self.policy.maybe_reset_virtual_display(status, virtual_display_requested)
    }

    pub fn can_retry(&self, attempt: u32) -> bool {
        self.policy.can_retry_apply(attempt)
    }

    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.policy.retry_delay(attempt)
    }

    pub fn dispatch_apply(&self, request: ApplyRequest, delay: Duration, reset_virtual_display: bool) {
        let token = self.system.token();
        let generation = token.generation();
        let enqueue = self.enqueue.clone();

        self.dispatcher.dispatch_apply(request, token, delay, reset_virtual_display, move |outcome| {
            let _ = enqueue.send(Message::ApplyCompleted {
                status: outcome.status.unwrap_or(ApplyStatus::Fatal),
                expected_topology: outcome.expected_topology,
                virtual_display_requested: outcome.virtual_display_requested,
                generation,
            });
        });
    }

    pub fn dispatch_verification(&self, request: ApplyRequest, expected_topology: Option<ActiveTopology>) {
        let token = self.system.token();
        let generation = token.generation();
        let enqueue = self.enqueue.clone();

        self.dispatcher
            .dispatch_verification(request, expected_topology, token, move |success| {
                let _ = enqueue.send(Message::VerificationCompleted { success, generation });
            });
    }
}

/// Drives recovery/recover-validate dispatches.
pub struct RecoveryPipeline {
    dispatcher: Arc<AsyncDispatcher>,
    system: Arc<SystemPorts>,
    enqueue: mpsc::UnboundedSender<Message>,
}

impl RecoveryPipeline {
    pub fn new(dispatcher: Arc<AsyncDispatcher>, system: Arc<SystemPorts>, enqueue: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            dispatcher,
            system,
            enqueue,
        }
    }

    pub fn dispatch_recovery(&self) {
        let token = self.system.token();
        let generation = token.generation();
        let enqueue = self.enqueue.clone();

        self.dispatcher.dispatch_recovery(token, move |outcome| {
            let _ = enqueue.send(Message::RecoveryCompleted {
                success: outcome.success,
                snapshot: outcome.snapshot,
                generation,
            });
        });
    }

    pub fn dispatch_recovery_validation(&self, snapshot: Snapshot) {
        let token = self.system.token();
        let generation = token.generation();
        let enqueue = self.enqueue.clone();

        self.dispatcher.dispatch_recovery_validation(snapshot, token, move |success| {
            let _ = enqueue.send(Message::RecoveryValidationCompleted { success, generation });
        });
    }
}

/// Capture/save/rotate, parameterized by the currently-set tier ordering
/// preference.
pub struct SnapshotLedger {
    service: Arc<SnapshotService>,
    persistence: Arc<SnapshotPersistence>,
}

impl SnapshotLedger {
    pub fn new(service: Arc<SnapshotService>, persistence: Arc<SnapshotPersistence>) -> Self {
        Self { service, persistence }
    }

    pub fn set_prefer_golden_first(&self, prefer: bool) {
        self.persistence.set_prefer_golden_first(prefer);
    }

    pub async fn capture(&self) -> Snapshot {
        self.service.capture().await
    }

    pub fn save(&self, tier: SnapshotTier, snapshot: Snapshot, blacklist: &BTreeSet<DeviceId>) -> bool {
        self.persistence.save(tier, snapshot, blacklist)
    }

    pub fn rotate_current_to_previous(&self) -> bool {
        self.persistence.rotate_current_to_previous()
    }
}

pub type StateObserver = Box<dyn Fn(StateTransition) + Send + Sync>;
pub type ApplyResultCallback = Box<dyn Fn(ApplyStatus) + Send + Sync>;
pub type VerificationResultCallback = Box<dyn Fn(bool) + Send + Sync>;
pub type ExitCallback = Box<dyn Fn(i32) + Send + Sync>;

pub struct StateMachine {
    apply: ApplyPipeline,
    recovery: RecoveryPipeline,
    snapshots: SnapshotLedger,
    system: Arc<SystemPorts>,

    state: State,
    recovery_armed: bool,
    apply_attempt: u32,
    apply_result_sent: bool,
    current_request: ApplyRequest,
    expected_topology: Option<ActiveTopology>,
    recovery_snapshot: Option<Snapshot>,
    snapshot_blacklist: BTreeSet<DeviceId>,

    observer: Option<StateObserver>,
    apply_result_callback: Option<ApplyResultCallback>,
    verification_result_callback: Option<VerificationResultCallback>,
    exit_callback: Option<ExitCallback>,
}

impl StateMachine {
    pub fn new(apply: ApplyPipeline, recovery: RecoveryPipeline, snapshots: SnapshotLedger, system: Arc<SystemPorts>) -> Self {
        Self {
            apply,
            recovery,
            snapshots,
            system,
            state: State::Waiting,
            recovery_armed: false,
            apply_attempt: 0,
            apply_result_sent: false,
            current_request: ApplyRequest::default(),
            expected_topology: None,
            recovery_snapshot: None,
            snapshot_blacklist: BTreeSet::new(),
            observer: None,
            apply_result_callback: None,
            verification_result_callback: None,
            exit_callback: None,
        }
    }

    pub fn set_state_observer(&mut self, observer: StateObserver) {
        self.observer = Some(observer);
    }

    pub fn set_apply_result_callback(&mut self, callback: ApplyResultCallback) {
        self.apply_result_callback = Some(callback);
    }

    pub fn set_verification_result_callback(&mut self, callback: VerificationResultCallback) {
        self.verification_result_callback = Some(callback);
    }

    pub fn set_exit_callback(&mut self, callback: ExitCallback) {
        self.exit_callback = Some(callback);
    }

    pub fn set_snapshot_blacklist(&mut self, blacklist: BTreeSet<DeviceId>) {
        self.snapshot_blacklist = blacklist;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn recovery_armed(&self) -> bool {
        self.recovery_armed
    }

    pub async fn handle_message(&mut self, message: Message) {
        match message {
            Message::Apply { request, generation } => self.handle_apply_command(request, generation).await,
            Message::Revert { generation } => self.handle_revert_command(generation).await,
            Message::Disarm { generation } => self.handle_disarm_command(generation).await,
            Message::ExportGolden { payload, generation } => {
                let _ = generation;
                self.handle_export_golden(payload).await;
            }
            Message::SnapshotCurrent { payload, generation } => {
                let _ = generation;
                self.handle_snapshot_current(payload).await;
            }
            Message::Reset { .. } => {
                // Deprecated: no-op.
            }
            Message::Ping { .. } => self.system.record_ping(),
            Message::Stop { .. } => self.invoke_exit(0),
            Message::ApplyCompleted {
                status,
                expected_topology,
                virtual_display_requested,
                generation,
            } => {
                self.handle_apply_completed(status, expected_topology, virtual_display_requested, generation)
                    .await;
            }
            Message::VerificationCompleted { success, generation } => {
                self.handle_verification_completed(success, generation).await;
            }
            Message::RecoveryCompleted {
                success,
                snapshot,
                generation,
            } => self.handle_recovery_completed(success, snapshot, generation),
            Message::RecoveryValidationCompleted { success, generation } => {
                self.handle_recovery_validation_completed(success, generation).await;
            }
            Message::DisplayEvent { generation, .. } => self.handle_display_event(generation),
            Message::HelperEvent { event, generation } => self.handle_helper_event(event, generation),
        }
    }

    async fn handle_apply_command(&mut self, request: ApplyRequest, generation: u64) {
        if self.is_stale(generation) {
            return;
        }

        // Apply always accepts and cancels in-flight work (spec §9).
        self.system.cancel_operations();

        self.apply_attempt = 1;
        self.apply_result_sent = false;
        self.snapshots.set_prefer_golden_first(request.prefer_golden_first);
        if let Some(exclude_devices) = &request.snapshot_exclude_devices {
            self.snapshot_blacklist = exclude_devices.iter().filter(|id| !id.is_empty()).cloned().collect();
        }
        self.current_request = request;
        self.expected_topology = None;

        self.system.create_restore_task().await;

        self.transition(State::InProgress, ApplyAction::Apply, None);
        self.apply.dispatch_apply(self.current_request.clone(), Duration::ZERO, false);
    }

    async fn handle_revert_command(&mut self, generation: u64) {
        if self.is_stale(generation) {
            return;
        }

        self.system.cancel_operations();
        self.recovery_armed = true;
        self.system.arm_heartbeat();
        self.system.delete_restore_task().await;

        self.transition(State::Recovery, ApplyAction::Revert, None);
        self.recovery.dispatch_recovery();
    }

    async fn handle_disarm_command(&mut self, generation: u64) {
        let _ = generation;
        self.system.cancel_operations();
        self.recovery_armed = false;
        self.system.disarm_heartbeat();
        self.system.delete_restore_task().await;
        self.apply_attempt = 0;
        self.apply_result_sent = false;
        self.expected_topology = None;
        self.recovery_snapshot = None;

        self.transition(State::Waiting, ApplyAction::Disarm, None);
    }

    async fn handle_export_golden(&mut self, payload: crate::types::SnapshotCommandPayload) {
        self.snapshot_blacklist = payload
            .exclude_devices
            .into_iter()
            .filter(|id| !id.is_empty())
            .collect();

        let snapshot = self.snapshots.capture().await;
        let _ = self.snapshots.save(SnapshotTier::Golden, snapshot, &self.snapshot_blacklist);
    }

    async fn handle_snapshot_current(&mut self, payload: crate::types::SnapshotCommandPayload) {
        self.snapshot_blacklist = payload
            .exclude_devices
            .into_iter()
            .filter(|id| !id.is_empty())
            .collect();

        let _ = self.snapshots.rotate_current_to_previous();
        let snapshot = self.snapshots.capture().await;
        let _ = self.snapshots.save(SnapshotTier::Current, snapshot, &self.snapshot_blacklist);
    }

    async fn handle_apply_completed(
        &mut self,
        status: ApplyStatus,
        expected_topology: Option<ActiveTopology>,
        virtual_display_requested: bool,
        generation: u64,
    ) {
        if self.is_stale(generation) {
            return;
        }

        self.expected_topology = expected_topology.clone();

        if status == ApplyStatus::Ok {
            self.emit_apply_result(status);
            self.transition(State::Verification, ApplyAction::Apply, Some(status));
            self.apply
                .dispatch_verification(self.current_request.clone(), self.expected_topology.clone());
            return;
        }

        if status == ApplyStatus::NeedsVirtualDisplayReset {
            let decision = self.apply.maybe_reset_virtual_display(status, virtual_display_requested);
            if decision == PolicyDecision::ResetVirtualDisplay {
                self.apply.dispatch_apply(self.current_request.clone(), Duration::ZERO, true);
                return;
            }
        }

        if matches!(status, ApplyStatus::Retryable | ApplyStatus::VerificationFailed)
            && self.apply.can_retry(self.apply_attempt)
        {
            let delay = self.apply.retry_delay(self.apply_attempt);
            self.apply_attempt += 1;
            self.apply.dispatch_apply(self.current_request.clone(), delay, false);
            return;
        }

        self.emit_apply_result(status);
        self.transition(State::Waiting, ApplyAction::Apply, Some(status));
    }

    async fn handle_verification_completed(&mut self, success: bool, generation: u64) {
        if self.is_stale(generation) {
            return;
        }

        if let Some(callback) = &self.verification_result_callback {
            callback(success);
        }

        if success {
            self.recovery_armed = true;
            self.system.arm_heartbeat();
            self.system.refresh_shell().await;
            if self.current_request.hdr_blank {
                self.system.blank_hdr_states(Duration::from_millis(1000)).await;
            }
        }

        let result_status = success.then_some(ApplyStatus::Ok);
        self.transition(State::Waiting, ApplyAction::Apply, result_status);
    }

    fn handle_recovery_completed(&mut self, success: bool, snapshot: Option<Snapshot>, generation: u64) {
        if self.is_stale(generation) {
            return;
        }

        if success {
            if let Some(snapshot) = snapshot {
                self.recovery_snapshot = Some(snapshot.clone());
                self.transition(State::RecoveryValidation, ApplyAction::Revert, None);
                self.recovery.dispatch_recovery_validation(snapshot);
                return;
            }
        }

        self.transition(State::EventLoop, ApplyAction::Revert, None);
    }

    async fn handle_recovery_validation_completed(&mut self, success: bool, generation: u64) {
        if self.is_stale(generation) {
            return;
        }

        if success {
            self.recovery_armed = false;
            self.system.disarm_heartbeat();
            self.system.delete_restore_task().await;
            self.invoke_exit(0);
            return;
        }

        self.transition(State::EventLoop, ApplyAction::Revert, None);
    }

    fn handle_display_event(&mut self, generation: u64) {
        if self.is_stale(generation) {
            return;
        }
        if self.state != State::EventLoop || !self.recovery_armed {
            return;
        }

        self.transition(State::Recovery, ApplyAction::Revert, None);
        self.recovery.dispatch_recovery();
    }

    fn handle_helper_event(&mut self, event: crate::types::HelperEvent, generation: u64) {
        if self.is_stale(generation) {
            return;
        }
        if event != crate::types::HelperEvent::HeartbeatTimeout || !self.recovery_armed {
            return;
        }
        if self.state != State::EventLoop {
            return;
        }

        self.transition(State::Recovery, ApplyAction::Revert, None);
        self.recovery.dispatch_recovery();
    }

    fn emit_apply_result(&mut self, status: ApplyStatus) {
        if self.apply_result_sent {
            return;
        }
        if let Some(callback) = &self.apply_result_callback {
            callback(status);
        }
        self.apply_result_sent = true;
    }

    fn invoke_exit(&self, code: i32) {
        if let Some(callback) = &self.exit_callback {
            callback(code);
        }
    }

    fn transition(&mut self, next: State, trigger: ApplyAction, status: Option<ApplyStatus>) {
        if next == self.state {
            return;
        }
        if let Some(observer) = &self.observer {
            observer(StateTransition {
                from: self.state,
                to: next,
                trigger,
                result_status: status,
            });
        }
        self.state = next;
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation != self.system.current_generation()
    }
}
