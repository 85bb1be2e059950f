use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation and deadline propagated from a request into long-running work.
///
/// Children share the parent's cancel flag and may only tighten the deadline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child context whose deadline is at most `timeout` from now.
    ///
    /// A timeout too large to represent leaves the parent's deadline in place.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(existing), Some(candidate)) => Some(existing.min(candidate)),
            (existing, candidate) => existing.or(candidate),
        };
        Self {
            deadline,
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancelled, or past the deadline.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_shares_cancel_flag() {
        let parent = RequestContext::new();
        let child = parent.with_timeout(Duration::from_secs(60));
        assert!(!child.is_done());
        parent.cancel();
        assert!(child.is_done());
    }

    #[test]
    fn test_child_cannot_extend_deadline() {
        let parent = RequestContext::new().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_unrepresentable_timeout_keeps_parent_deadline() {
        let parent = RequestContext::new();
        assert_eq!(parent.with_timeout(Duration::MAX).deadline(), None);
        let bounded = parent.with_timeout(Duration::from_secs(5));
        assert_eq!(bounded.with_timeout(Duration::MAX).deadline(), bounded.deadline());
    }

    #[test]
    fn test_deadline_expires() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.is_done());
    }
}
