//! Cooperative cancellation for searches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Deadline plus a shared abort flag. Cheap to clone and to poll.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    deadline: Option<Instant>,
    abort: Arc<AtomicBool>,
}

impl CancelToken {
    /// Never cancels unless aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token sharing this one's abort flag, with its own time budget.
    pub fn child(&self, budget: Option<Duration>) -> Self {
        Self {
            deadline: budget.map(|b| Instant::now() + b),
            abort: Arc::clone(&self.abort),
        }
    }

    /// Cancel this token and every token sharing its flag.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.is_aborted() || self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_propagates_to_children() {
        let parent = CancelToken::new();
        let child = parent.child(None);
        assert!(!child.is_cancelled());
        parent.abort();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_deadline() {
        let token = CancelToken::new().child(Some(Duration::ZERO));
        assert!(token.is_expired());
        assert!(!token.is_aborted());
        assert!(!CancelToken::new().child(Some(Duration::from_secs(3600))).is_cancelled());
    }
}
