//! IPC listener (spec §4.12, §6): accepts a single streaming-host connection
//! at a time over a loopback TCP socket, routes inbound frames into
//! state-machine messages, and carries outbound `ApplyResult` /
//! `VerificationResult` / `Ping`-echo frames back to whichever connection is
//! currently live.
//!
//! A loopback TCP port stands in for the original's named pipe — the
//! idiomatic cross-platform analogue, and (bound once at startup) doubles as
//! the singleton guard described in spec §6's exit-code table.

use display_core::reconnect::ReconnectController;
use display_core::types::{ApplyRequest, Message, SnapshotCommandPayload};
use display_protocol::{self as proto, Tag};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const SINGLETON_PORT: u16 = 47991;

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("another display helper instance is already running")]
    AlreadyRunning,
    #[error("failed to bind singleton port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Binds the well-known loopback port. `AddrInUse` is interpreted as
/// "another instance is running" (spec §6 exit code 3).
pub async fn bind_singleton(port: u16) -> Result<TcpListener, IpcError> {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => Err(IpcError::AlreadyRunning),
        Err(err) => Err(IpcError::Bind(err)),
    }
}

type OutboundFrame = (Tag, Vec<u8>);

/// Handed to the state machine's result callbacks; forwards frames to
/// whichever connection is currently accepted, dropping them silently if
/// none is (mirrors the original's null `active_pipe` check).
#[derive(Clone, Default)]
pub struct Outbound {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>>,
}

impl Outbound {
    pub fn send(&self, tag: Tag, body: Vec<u8>) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send((tag, body));
        }
    }

    fn attach(&self) -> mpsc::UnboundedReceiver<OutboundFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        rx
    }

    fn detach(&self) {
        *self.sender.lock().unwrap() = None;
    }
}

/// Accepts connections until `running` is cleared, processing exactly one at
/// a time. A single [`ReconnectController`] spans the whole listener
/// lifetime — disconnects persist across accept attempts, so a sustained
/// 30 s gap with no live connection triggers exactly one autonomous Revert
/// (spec §8 scenario S6), independent of whether a new connection happens to
/// arrive partway through the grace window.
pub async fn serve(
    listener: TcpListener,
    enqueue: mpsc::UnboundedSender<Message>,
    cancellation: display_core::CancellationSource,
    outbound: Outbound,
    clock: Arc<dyn display_core::Clock>,
    running: Arc<AtomicBool>,
) {
    let reconnect = Arc::new(ReconnectController::new(Arc::clone(&clock), Duration::from_secs(30)));
    let connected = Arc::new(AtomicBool::new(false));

    let ticker = tokio::spawn(poll_reconnect(
        Arc::clone(&reconnect),
        Arc::clone(&connected),
        enqueue.clone(),
        cancellation.clone(),
        Arc::clone(&clock),
        Arc::clone(&running),
    ));

    while running.load(Ordering::Acquire) {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(%err, "IPC accept failed");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };
        tracing::info!(%peer, "streaming host connected");
        connected.store(true, Ordering::Release);

        handle_connection(stream, &enqueue, &cancellation, &outbound, &running).await;

        connected.store(false, Ordering::Release);
        outbound.detach();
        tracing::info!(%peer, "streaming host disconnected");
    }

    ticker.abort();
}

/// Polls connection state every 250 ms against the reconnect controller's
/// grace window; this granularity is a binary-level implementation choice,
/// not a spec timeout.
async fn poll_reconnect(
    reconnect: Arc<ReconnectController>,
    connected: Arc<AtomicBool>,
    enqueue: mpsc::UnboundedSender<Message>,
    cancellation: display_core::CancellationSource,
    clock: Arc<dyn display_core::Clock>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        clock.sleep(Duration::from_millis(250)).await;
        let should_revert = reconnect.update_connection(connected.load(Ordering::Acquire));
        if should_revert {
            let _ = enqueue.send(Message::Revert {
                generation: cancellation.current_generation(),
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    enqueue: &mpsc::UnboundedSender<Message>,
    cancellation: &display_core::CancellationSource,
    outbound: &Outbound,
    running: &Arc<AtomicBool>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut outbound_rx = outbound.attach();

    let writer = tokio::spawn(async move {
        while let Some((tag, body)) = outbound_rx.recv().await {
            if proto::write_frame(&mut write_half, tag, &body).await.is_err() {
                break;
            }
            let _ = write_half.flush().await;
        }
    });

    while running.load(Ordering::Acquire) {
        match proto::read_frame(&mut read_half).await {
            Ok((tag, body)) => route_frame(tag, body, enqueue, cancellation, outbound),
            Err(_) => break,
        }
    }

    writer.abort();
}

fn route_frame(
    tag: Tag,
    body: Vec<u8>,
    enqueue: &mpsc::UnboundedSender<Message>,
    cancellation: &display_core::CancellationSource,
    outbound: &Outbound,
) {
    let generation = cancellation.current_generation();

    match tag {
        Tag::Apply => match proto::parse_apply_payload(&body) {
            Ok(parsed) => {
                let request = match build_apply_request(parsed) {
                    Ok(request) => request,
                    Err(error) => {
                        outbound.send(Tag::ApplyResult, proto::encode_apply_result(false, Some(&error)));
                        return;
                    }
                };
                let _ = enqueue.send(Message::Apply { request, generation });
            }
            Err(err) => {
                outbound.send(Tag::ApplyResult, proto::encode_apply_result(false, Some(&err.to_string())));
            }
        },
        Tag::Revert => {
            let _ = enqueue.send(Message::Revert { generation });
        }
        Tag::Reset => {
            let _ = enqueue.send(Message::Reset { generation });
        }
        Tag::Disarm => {
            let _ = enqueue.send(Message::Disarm { generation });
        }
        Tag::ExportGolden => {
            let payload = snapshot_payload(&body);
            let _ = enqueue.send(Message::ExportGolden { payload, generation });
        }
        Tag::SnapshotCurrent => {
            let payload = snapshot_payload(&body);
            let _ = enqueue.send(Message::SnapshotCurrent { payload, generation });
        }
        Tag::Ping => {
            outbound.send(Tag::Ping, Vec::new());
            let _ = enqueue.send(Message::Ping { generation });
        }
        Tag::Stop => {
            let _ = enqueue.send(Message::Stop { generation });
        }
        Tag::ApplyResult | Tag::VerificationResult => {
            // Outbound-only tags; never expected inbound.
        }
    }
}

fn snapshot_payload(body: &[u8]) -> SnapshotCommandPayload {
    SnapshotCommandPayload {
        exclude_devices: proto::parse_device_exclude_payload(body).unwrap_or_default(),
    }
}

/// Builds a core `ApplyRequest` out of the wire-level parsed payload. The
/// remaining (non-extension) JSON is expected to deserialize into a
/// `SingleDisplayConfiguration`; a failure there is the request's only
/// source of `InvalidRequest`-before-dispatch rejection.
fn build_apply_request(parsed: proto::ParsedApplyPayload) -> Result<ApplyRequest, String> {
    let configuration = serde_json::from_value(parsed.configuration_json).map_err(|err| err.to_string())?;

    Ok(ApplyRequest {
        configuration: Some(configuration),
        topology: parsed.extensions.topology,
        monitor_positions: parsed.extensions.monitor_positions.into_iter().collect(),
        hdr_blank: parsed.extensions.hdr_blank.unwrap_or(false),
        prefer_golden_first: parsed.extensions.prefer_golden_first.unwrap_or(false),
        virtual_layout: parsed.extensions.virtual_layout,
        snapshot_exclude_devices: parsed.extensions.snapshot_exclude_devices,
    })
}
