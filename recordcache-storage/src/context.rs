//! Per-request cancellation and deadline.

use std::future::Future;
use std::time::Duration;

use recordcache_core::{RecordError, RecordResult};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal and optional deadline carried by every repository call.
///
/// Cloning shares the same token. [`RequestContext::child`] derives a context
/// that is cancelled with its parent but can also be cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().with_deadline(Instant::now() + timeout)
    }

    /// Replace the deadline. A deadline later than the current one is ignored.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derive a context that inherits this one's cancellation and deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast if the context is already done.
    pub fn check(&self) -> RecordResult<()> {
        if self.token.is_cancelled() {
            return Err(RecordError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(RecordError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` until it completes or the context ends, whichever is first.
    ///
    /// Cancellation wins over a simultaneously ready future.
    pub async fn run<F: Future>(&self, fut: F) -> RecordResult<F::Output> {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(RecordError::Cancelled),
            _ = deadline => Err(RecordError::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_context_runs_to_completion() {
        let ctx = RequestContext::new();
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let ctx = RequestContext::new();
        ctx.cancel();
        assert_eq!(ctx.check(), Err(RecordError::Cancelled));
        assert_eq!(ctx.run(async { 7 }).await, Err(RecordError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_slow_future() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(100));
        let slow = tokio::time::sleep(Duration::from_secs(10));
        assert_eq!(ctx.run(slow).await, Err(RecordError::DeadlineExceeded));
        assert_eq!(ctx.check(), Err(RecordError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_run() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = ctx.run(tokio::time::sleep(Duration::from_secs(60))).await;
        assert_eq!(result, Err(RecordError::Cancelled));
    }

    #[test]
    fn test_child_follows_parent_but_not_vice_versa() {
        let parent = RequestContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other_child = parent.child();
        parent.cancel();
        assert!(other_child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_keeps_earliest() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(1))
            .with_deadline(Instant::now() + Duration::from_secs(30));
        assert_eq!(ctx.deadline(), Some(Instant::now() + Duration::from_secs(1)));
    }
}
