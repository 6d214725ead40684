//! Apply policy (spec §4.4): retry budget and delay for apply failures,
//! virtual-display reset cooldown, fatal-vs-retryable classification.

use crate::clock::Clock;
use crate::types::{ApplyStatus, PolicyDecision};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const MAX_APPLY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(300);
const VIRTUAL_DISPLAY_RESET_COOLDOWN: Duration = Duration::from_secs(30);

pub struct ApplyPolicy {
    clock: Arc<dyn Clock>,
    last_reset: Mutex<Option<Instant>>,
}

impl ApplyPolicy {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_reset: Mutex::new(None),
        }
    }

    /// `NeedsVirtualDisplayReset` with a virtual display in play triggers a
    /// bounce unless one happened within the last 30 s.
    pub fn maybe_reset_virtual_display(
        &self,
        status: ApplyStatus,
        virtual_display_requested: bool,
    ) -> PolicyDecision {
        if status != ApplyStatus::NeedsVirtualDisplayReset || !virtual_display_requested {
            return PolicyDecision::Proceed;
        }

        let now = self.clock.now();
        let mut last_reset = self.last_reset.lock().unwrap();
        if let Some(previous) = *last_reset {
            if now.saturating_duration_since(previous) < VIRTUAL_DISPLAY_RESET_COOLDOWN {
                return PolicyDecision::Proceed;
            }
        }

        *last_reset = Some(now);
        PolicyDecision::ResetVirtualDisplay
    }

    /// Constant 300 ms, intentionally non-exponential: the protocol already
    /// has its own timers.
    pub fn retry_delay(&self, _attempt: u32) -> Duration {
        RETRY_DELAY
    }

    pub fn should_skip_tier(&self, status: ApplyStatus) -> bool {
        matches!(status, ApplyStatus::InvalidRequest | ApplyStatus::Fatal)
    }

    pub fn can_retry_apply(&self, attempt: u32) -> bool {
        attempt < MAX_APPLY_ATTEMPTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn retry_budget_allows_exactly_max_attempts() {
        let policy = ApplyPolicy::new(Arc::new(FakeClock::new()));
        assert!(policy.can_retry_apply(0));
        assert!(policy.can_retry_apply(2));
        assert!(!policy.can_retry_apply(3));
    }

    #[test]
    fn vd_reset_cooldown_suppresses_second_bounce_within_window() {
        let clock = Arc::new(FakeClock::new());
        let policy = ApplyPolicy::new(clock.clone());

        let first = policy.maybe_reset_virtual_display(ApplyStatus::NeedsVirtualDisplayReset, true);
        assert_eq!(first, PolicyDecision::ResetVirtualDisplay);

        let second = policy.maybe_reset_virtual_display(ApplyStatus::NeedsVirtualDisplayReset, true);
        assert_eq!(second, PolicyDecision::Proceed);

        clock.advance(Duration::from_secs(30));
        let third = policy.maybe_reset_virtual_display(ApplyStatus::NeedsVirtualDisplayReset, true);
        assert_eq!(third, PolicyDecision::ResetVirtualDisplay);
    }

    #[test]
    fn vd_reset_ignored_without_virtual_display_requested() {
        let policy = ApplyPolicy::new(Arc::new(FakeClock::new()));
        let decision = policy.maybe_reset_virtual_display(ApplyStatus::NeedsVirtualDisplayReset, false);
        assert_eq!(decision, PolicyDecision::Proceed);
    }

    #[test]
    fn should_skip_tier_only_for_invalid_or_fatal() {
        let policy = ApplyPolicy::new(Arc::new(FakeClock::new()));
        assert!(policy.should_skip_tier(ApplyStatus::InvalidRequest));
        assert!(policy.should_skip_tier(ApplyStatus::Fatal));
        assert!(!policy.should_skip_tier(ApplyStatus::Retryable));
    }
}
