//! Display helper binary: composition root wiring the pure `display-core`
//! state machine to a concrete clock, placeholder OS ports, on-disk snapshot
//! storage, and the loopback IPC listener. Analogous to
//! `tools/display_settings_helper_v2.cpp` in the original implementation.

mod event_pump;
mod ipc;
mod logging;
mod paths;
mod platform;

use display_core::{
    ApplyOperation, ApplyPipeline, ApplyPolicy, AsyncDispatcher, CancellationSource, FileSnapshotStorage,
    HeartbeatMonitor, RecoveryOperation, RecoveryPipeline, RecoveryValidationOperation, SnapshotLedger,
    SnapshotPaths, SnapshotPersistence, SnapshotService, StateMachine, SystemClock, SystemPorts,
    VerificationOperation,
};
use display_protocol::Tag;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let mut restore_mode = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--restore" => restore_mode = true,
            "--no-startup-restore" => {}
            _ => {}
        }
    }

    let helper_paths = paths::resolve();
    let _log_guard = logging::init(&helper_paths.root);
    tracing::info!("display helper starting up");

    let listener = match ipc::bind_singleton(ipc::SINGLETON_PORT).await {
        Ok(listener) => listener,
        Err(ipc::IpcError::AlreadyRunning) => {
            tracing::warn!("another instance is already running, exiting with code 3");
            return std::process::ExitCode::from(3);
        }
        Err(err) => {
            tracing::error!(%err, "failed to bind singleton port");
            return std::process::ExitCode::FAILURE;
        }
    };

    paths::migrate_legacy_snapshot(&helper_paths);

    let clock: Arc<dyn display_core::Clock> = Arc::new(SystemClock);
    let display_settings: Arc<dyn display_core::DisplaySettingsPort> = Arc::new(platform::UnavailableDisplaySettings);
    let virtual_display: Arc<dyn display_core::ports::VirtualDisplayPort> = Arc::new(platform::UnavailableVirtualDisplay);
    let task_manager: Arc<dyn display_core::ports::ScheduledTaskPort> = Arc::new(platform::NoopScheduledTask);
    let workarounds: Arc<dyn display_core::ports::PlatformWorkaroundsPort> = Arc::new(platform::NoopPlatformWorkarounds);

    let snapshot_paths = SnapshotPaths {
        current: helper_paths.current.clone(),
        previous: helper_paths.previous.clone(),
        golden: helper_paths.golden.clone(),
    };
    let storage = Arc::new(FileSnapshotStorage::new(snapshot_paths));
    let snapshot_service = Arc::new(SnapshotService::new(Arc::clone(&display_settings)));
    let snapshot_persistence = Arc::new(SnapshotPersistence::new(storage));
    let apply_policy = Arc::new(ApplyPolicy::new(Arc::clone(&clock)));
    let heartbeat = Arc::new(HeartbeatMonitor::new(Arc::clone(&clock)));
    let cancellation = CancellationSource::new();

    let system = Arc::new(SystemPorts::new(
        Arc::clone(&workarounds),
        Arc::clone(&task_manager),
        Arc::clone(&heartbeat),
        Arc::clone(&clock),
        cancellation.clone(),
    ));

    let apply_operation = Arc::new(ApplyOperation::new(Arc::clone(&display_settings)));
    let verification_operation = Arc::new(VerificationOperation::new(Arc::clone(&display_settings), Arc::clone(&clock)));
    let recovery_operation = Arc::new(RecoveryOperation::new(
        Arc::clone(&display_settings),
        Arc::clone(&snapshot_service),
        Arc::clone(&snapshot_persistence),
        Arc::clone(&apply_policy),
        Arc::clone(&clock),
    ));
    let recovery_validation_operation = Arc::new(RecoveryValidationOperation::new(
        Arc::clone(&snapshot_service),
        Arc::clone(&clock),
    ));

    let dispatcher = Arc::new(AsyncDispatcher::new(
        apply_operation,
        verification_operation,
        recovery_operation,
        recovery_validation_operation,
        Arc::clone(&virtual_display),
        Arc::clone(&clock),
    ));

    let (enqueue, mut messages) = mpsc::unbounded_channel();

    let apply_pipeline = ApplyPipeline::new(
        Arc::clone(&dispatcher),
        Arc::clone(&apply_policy),
        Arc::clone(&system),
        enqueue.clone(),
    );
    let recovery_pipeline = RecoveryPipeline::new(Arc::clone(&dispatcher), Arc::clone(&system), enqueue.clone());
    let snapshot_ledger = SnapshotLedger::new(snapshot_service, snapshot_persistence);

    let mut state_machine = StateMachine::new(apply_pipeline, recovery_pipeline, snapshot_ledger, Arc::clone(&system));

    let outbound = ipc::Outbound::default();
    let exit_code = Arc::new(AtomicI32::new(0));
    let running = Arc::new(AtomicBool::new(true));

    {
        let exit_code = Arc::clone(&exit_code);
        let running = Arc::clone(&running);
        state_machine.set_exit_callback(Box::new(move |code| {
            exit_code.store(code, Ordering::Release);
            running.store(false, Ordering::Release);
        }));
    }
    {
        let outbound = outbound.clone();
        state_machine.set_apply_result_callback(Box::new(move |status| {
            let ok = status == display_core::ApplyStatus::Ok;
            outbound.send(Tag::ApplyResult, display_protocol::encode_apply_result(ok, None));
        }));
    }
    {
        let outbound = outbound.clone();
        state_machine.set_verification_result_callback(Box::new(move |success| {
            outbound.send(Tag::VerificationResult, display_protocol::encode_verification_result(success));
        }));
    }

    if restore_mode {
        tracing::info!("running in restore mode");
        let _ = enqueue.send(display_core::Message::Revert {
            generation: cancellation.current_generation(),
        });

        while running.load(Ordering::Acquire) {
            if let Some(message) = messages.recv().await {
                state_machine.handle_message(message).await;
            } else {
                break;
            }
        }

        let code = exit_code.load(Ordering::Acquire);
        tracing::info!(code, "restore mode completed");
        return std::process::ExitCode::from(code as u8);
    }

    let pump = event_pump::EventPump::new(Arc::clone(&clock));

    let ipc_task = tokio::spawn(ipc::serve(
        listener,
        enqueue.clone(),
        cancellation.clone(),
        outbound,
        Arc::clone(&clock),
        Arc::clone(&running),
    ));

    while running.load(Ordering::Acquire) {
        tokio::select! {
            message = messages.recv() => {
                if let Some(message) = message {
                    state_machine.handle_message(message).await;
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {
                if heartbeat.check_timeout() {
                    let _ = enqueue.send(display_core::Message::HelperEvent {
                        event: display_core::types::HelperEvent::HeartbeatTimeout,
                        generation: cancellation.current_generation(),
                    });
                }
                if pump.should_fire() {
                    let _ = enqueue.send(display_core::Message::DisplayEvent {
                        event: display_core::types::DisplayEvent::DisplayChange,
                        generation: cancellation.current_generation(),
                    });
                }
            }
        }
    }

    ipc_task.abort();
    let code = exit_code.load(Ordering::Acquire);
    tracing::info!(code, "display helper shutting down");
    std::process::ExitCode::from(code as u8)
}
