//! Reconnect/heartbeat/debounce state objects (spec §4.10, §4.11). Each is
//! owned by whichever thread drives it but built to tolerate being shared
//! (the original pairs identical state with its own mutex); time is always
//! read through the [`Clock`] port so tests can advance it deterministically.

use crate::clock::Clock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Coalesces repeated notifications into a single delayed fire.
pub struct DebouncedTrigger {
    delay: Duration,
    state: Mutex<DebounceState>,
}

struct DebounceState {
    pending: bool,
    deadline: Instant,
}

impl DebouncedTrigger {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Mutex::new(DebounceState {
                pending: false,
                deadline: Instant::now(),
            }),
        }
    }

    pub fn notify(&self, now: Instant) {
        let mut state = self.state.lock().unwrap();
        state.pending = true;
        state.deadline = now + self.delay;
    }

    /// Returns true at most once per `notify` once the delay has elapsed.
    pub fn should_fire(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.pending || now < state.deadline {
            return false;
        }
        state.pending = false;
        true
    }

    pub fn pending(&self) -> bool {
        self.state.lock().unwrap().pending
    }

    pub fn reset(&self) {
        self.state.lock().unwrap().pending = false;
    }
}

/// Arms on disconnect, fires `should_trigger` exactly once per arm once
/// `grace` has elapsed with no reconnect.
pub struct DisconnectGrace {
    clock: Arc<dyn Clock>,
    grace: Duration,
    state: Mutex<GraceState>,
}

struct GraceState {
    pending: bool,
    triggered: bool,
    disconnect_at: Instant,
}

impl DisconnectGrace {
    pub fn new(clock: Arc<dyn Clock>, grace: Duration) -> Self {
        let disconnect_at = clock.now();
        Self {
            clock,
            grace,
            state: Mutex::new(GraceState {
                pending: false,
                triggered: false,
                disconnect_at,
            }),
        }
    }

    pub fn on_disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending = true;
        state.triggered = false;
        state.disconnect_at = self.clock.now();
    }

    pub fn on_reconnect(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending = false;
        state.triggered = false;
    }

    pub fn should_trigger(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.pending || state.triggered {
            return false;
        }
        if self.clock.now().saturating_duration_since(state.disconnect_at) >= self.grace {
            state.triggered = true;
            return true;
        }
        false
    }
}

/// Tracks IPC liveness transitions; surfaces "start a revert" exactly once
/// per sustained disconnect.
pub struct ReconnectController {
    grace: DisconnectGrace,
    was_connected: Mutex<bool>,
    restart_pipe: Mutex<bool>,
}

impl ReconnectController {
    pub fn new(clock: Arc<dyn Clock>, grace: Duration) -> Self {
        Self {
            grace: DisconnectGrace::new(clock, grace),
            was_connected: Mutex::new(false),
            restart_pipe: Mutex::new(false),
        }
    }

    pub fn on_broken(&self) {
        *self.restart_pipe.lock().unwrap() = true;
        *self.was_connected.lock().unwrap() = false;
        self.grace.on_disconnect();
    }

    pub fn on_error(&self) {
        self.on_broken();
    }

    /// Returns true exactly once when the grace window has elapsed with no
    /// reconnect. Callers use that to emit a Revert.
    pub fn update_connection(&self, connected: bool) -> bool {
        let mut was_connected = self.was_connected.lock().unwrap();
        if connected && !*was_connected {
            self.grace.on_reconnect();
        } else if !connected && *was_connected {
            self.grace.on_disconnect();
        }
        *was_connected = connected;

        !connected && self.grace.should_trigger()
    }

    pub fn should_restart_pipe(&self) -> bool {
        *self.restart_pipe.lock().unwrap()
    }
}

/// Arms a 30-second countdown from the last ping; fires at most once per
/// arm until the next `record_ping`/`arm`.
pub struct HeartbeatMonitor {
    clock: Arc<dyn Clock>,
    state: Mutex<HeartbeatState>,
}

struct HeartbeatState {
    armed: bool,
    timed_out: bool,
    last_ping: Instant,
}

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

impl HeartbeatMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let last_ping = clock.now();
        Self {
            clock,
            state: Mutex::new(HeartbeatState {
                armed: false,
                timed_out: false,
                last_ping,
            }),
        }
    }

    pub fn arm(&self) {
        let mut state = self.state.lock().unwrap();
        state.armed = true;
        state.timed_out = false;
        state.last_ping = self.clock.now();
    }

    pub fn disarm(&self) {
        let mut state = self.state.lock().unwrap();
        state.armed = false;
        state.timed_out = false;
    }

    pub fn record_ping(&self) {
        let mut state = self.state.lock().unwrap();
        state.last_ping = self.clock.now();
        state.timed_out = false;
    }

    pub fn check_timeout(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.armed || state.timed_out {
            return false;
        }
        if self.clock.now().saturating_duration_since(state.last_ping) >= HEARTBEAT_TIMEOUT {
            state.timed_out = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn debounce_fires_once_after_delay_elapses() {
        let trigger = DebouncedTrigger::new(Duration::from_millis(500));
        let t0 = Instant::now();
        trigger.notify(t0);
        assert!(!trigger.should_fire(t0));
        assert!(trigger.should_fire(t0 + Duration::from_millis(500)));
        assert!(!trigger.should_fire(t0 + Duration::from_millis(600)));
    }

    #[test]
    fn disconnect_grace_triggers_once_per_arm() {
        let clock = Arc::new(FakeClock::new());
        let grace = DisconnectGrace::new(clock.clone(), Duration::from_secs(30));
        grace.on_disconnect();
        assert!(!grace.should_trigger());
        clock.advance(Duration::from_secs(30));
        assert!(grace.should_trigger());
        assert!(!grace.should_trigger());
    }

    #[test]
    fn disconnect_grace_reconnect_clears_pending() {
        let clock = Arc::new(FakeClock::new());
        let grace = DisconnectGrace::new(clock.clone(), Duration::from_secs(30));
        grace.on_disconnect();
        grace.on_reconnect();
        clock.advance(Duration::from_secs(30));
        assert!(!grace.should_trigger());
    }

    #[test]
    fn reconnect_controller_triggers_revert_once_per_disconnect() {
        let clock = Arc::new(FakeClock::new());
        let controller = ReconnectController::new(clock.clone(), Duration::from_secs(30));
        assert!(!controller.update_connection(false));
        clock.advance(Duration::from_secs(30));
        assert!(controller.update_connection(false));
        assert!(!controller.update_connection(false));

        assert!(!controller.update_connection(true));
        assert!(!controller.update_connection(true));
    }

    #[test]
    fn heartbeat_times_out_once_after_30s_without_ping() {
        let clock = Arc::new(FakeClock::new());
        let heartbeat = HeartbeatMonitor::new(clock.clone());
        heartbeat.arm();
        assert!(!heartbeat.check_timeout());
        clock.advance(Duration::from_secs(30));
        assert!(heartbeat.check_timeout());
        assert!(!heartbeat.check_timeout());
    }

    #[test]
    fn heartbeat_record_ping_resets_timeout() {
        let clock = Arc::new(FakeClock::new());
        let heartbeat = HeartbeatMonitor::new(clock.clone());
        heartbeat.arm();
        clock.advance(Duration::from_secs(20));
        heartbeat.record_ping();
        clock.advance(Duration::from_secs(20));
        assert!(!heartbeat.check_timeout());
    }
}
