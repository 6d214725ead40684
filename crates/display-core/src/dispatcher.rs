//! Async dispatcher (spec §4.1): a single worker that executes one of
//! {apply, verify, recover, recover-validate} off the state-machine thread,
//! delivering a completion message when done. Tasks run strictly in
//! enqueue order.

use crate::cancellation::CancellationToken;
use crate::clock::Clock;
use crate::operations::{ApplyOperation, RecoveryOperation, RecoveryValidationOperation, VerificationOperation};
use crate::ports::VirtualDisplayPort;
use crate::types::{ActiveTopology, ApplyOutcome, ApplyRequest, RecoveryOutcome, Snapshot};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Dispatches one of the four long-running operations onto the worker.
/// Completions are delivered through `completion`, which the caller (the
/// state machine's driving loop) uses to re-enqueue a message — the
/// dispatcher holds no handle back to the state machine, breaking the
/// callback cycle the original implementation has via raw function pointers.
pub struct AsyncDispatcher {
    apply_operation: Arc<ApplyOperation>,
    verification_operation: Arc<VerificationOperation>,
    recovery_operation: Arc<RecoveryOperation>,
    recovery_validation_operation: Arc<RecoveryValidationOperation>,
    virtual_display: Arc<dyn VirtualDisplayPort>,
    clock: Arc<dyn Clock>,
    tasks: mpsc::UnboundedSender<Task>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl AsyncDispatcher {
    pub fn new(
        apply_operation: Arc<ApplyOperation>,
        verification_operation: Arc<VerificationOperation>,
        recovery_operation: Arc<RecoveryOperation>,
        recovery_validation_operation: Arc<RecoveryValidationOperation>,
        virtual_display: Arc<dyn VirtualDisplayPort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let worker = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task.await;
            }
        });

        Self {
            apply_operation,
            verification_operation,
            recovery_operation,
            recovery_validation_operation,
            virtual_display,
            clock,
            tasks: tx,
            worker: Some(worker),
        }
    }

    fn enqueue(&self, task: Task) {
        // The receiver only disappears once `self` is dropped, since the
        // worker owns the sending half indirectly through this struct.
        let _ = self.tasks.send(task);
    }

    pub fn dispatch_apply<F>(
        &self,
        request: ApplyRequest,
        token: CancellationToken,
        delay: Duration,
        reset_virtual_display: bool,
        completion: F,
    ) where
        F: FnOnce(ApplyOutcome) + Send + 'static,
    {
        let apply_operation = Arc::clone(&self.apply_operation);
        let virtual_display = Arc::clone(&self.virtual_display);
        let clock = Arc::clone(&self.clock);

        self.enqueue(Box::pin(async move {
            if delay > Duration::ZERO {
                clock.sleep(delay).await;
            }

            if reset_virtual_display {
                if !virtual_display.disable().await {
                    completion(ApplyOutcome::fatal());
                    return;
                }
                clock.sleep(Duration::from_millis(500)).await;
                if !virtual_display.enable().await {
                    completion(ApplyOutcome::fatal());
                    return;
                }
                clock.sleep(Duration::from_millis(1000)).await;
            }

            completion(apply_operation.run(&request, &token).await);
        }));
    }

    pub fn dispatch_verification<F>(
        &self,
        request: ApplyRequest,
        expected_topology: Option<ActiveTopology>,
        token: CancellationToken,
        completion: F,
    ) where
        F: FnOnce(bool) + Send + 'static,
    {
        let verification_operation = Arc::clone(&self.verification_operation);

        self.enqueue(Box::pin(async move {
            let success = verification_operation
                .run(&request, expected_topology.as_ref(), &token)
                .await;
            completion(success);
        }));
    }

    pub fn dispatch_recovery<F>(&self, token: CancellationToken, completion: F)
    where
        F: FnOnce(RecoveryOutcome) + Send + 'static,
    {
        let recovery_operation = Arc::clone(&self.recovery_operation);

        self.enqueue(Box::pin(async move {
            completion(recovery_operation.run(&token).await);
        }));
    }

    pub fn dispatch_recovery_validation<F>(&self, snapshot: Snapshot, token: CancellationToken, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let recovery_validation_operation = Arc::clone(&self.recovery_validation_operation);

        self.enqueue(Box::pin(async move {
            let success = recovery_validation_operation.run(&snapshot, &token).await;
            completion(success);
        }));
    }
}

impl Drop for AsyncDispatcher {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
