//! Generation-based cancellation (spec §5): every dispatched task records
//! the generation it was issued under; the state machine drops completions
//! whose generation no longer matches the current one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct CancellationToken {
    generation: Arc<AtomicU64>,
    expected: u64,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.generation.load(Ordering::Acquire) != self.expected
    }

    pub fn generation(&self) -> u64 {
        self.expected
    }
}

#[derive(Clone)]
pub struct CancellationSource {
    generation: Arc<AtomicU64>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            generation: Arc::clone(&self.generation),
            expected: self.generation.load(Ordering::Acquire),
        }
    }

    /// Bump the generation, invalidating every token handed out so far.
    /// Returns the new generation.
    pub fn cancel(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let source = CancellationSource::new();
        assert!(!source.token().is_cancelled());
    }

    #[test]
    fn cancel_invalidates_outstanding_tokens() {
        let source = CancellationSource::new();
        let token = source.token();
        source.cancel();
        assert!(token.is_cancelled());
        assert!(!source.token().is_cancelled());
    }

    #[test]
    fn cancel_returns_new_generation() {
        let source = CancellationSource::new();
        assert_eq!(source.cancel(), 1);
        assert_eq!(source.cancel(), 2);
        assert_eq!(source.current_generation(), 2);
    }
}
