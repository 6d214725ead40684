//! OS event pump (spec §4.11). The real signal sources (display-change,
//! power-resume, device arrival/removal) are platform APIs out of scope
//! here; this module only owns the debounce coalescing, driven from
//! whatever feeds it `notify()`.

use display_core::clock::Clock;
use display_core::reconnect::DebouncedTrigger;
use std::sync::Arc;
use std::time::Duration;

pub struct EventPump {
    debouncer: DebouncedTrigger,
    clock: Arc<dyn Clock>,
}

impl EventPump {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            debouncer: DebouncedTrigger::new(Duration::from_millis(500)),
            clock,
        }
    }

    /// Called by a platform signal source when any display-change,
    /// power-resume, device-arrival, or device-removal event fires.
    pub fn notify(&self) {
        self.debouncer.notify(self.clock.now());
    }

    /// Polled from the driving loop; fires at most once per burst of
    /// `notify()` calls, once the debounce interval has elapsed.
    pub fn should_fire(&self) -> bool {
        self.debouncer.should_fire(self.clock.now())
    }
}
