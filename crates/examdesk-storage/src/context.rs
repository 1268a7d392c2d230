//! Request-scoped deadline and cancellation.
//!
//! A [`RequestContext`] is created once per inbound request and passed by reference
//! to every repository call. All network waits go through [`RequestContext::run`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a bounded operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    /// The caller cancelled the request.
    #[error("operation cancelled by caller")]
    Cancelled,
    /// The request deadline passed.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

/// Deadline plus cancellation signal for one logical operation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Context that expires `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Context with an explicit deadline and cancellation token.
    pub fn with_cancel(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    /// Token that cancels this context.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Absolute deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns `true` once the caller cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Same deadline, but not tied to this caller's cancellation.
    ///
    /// Work shared between several callers runs under a detached context so that one
    /// caller going away does not abort it for the others.
    pub fn detached(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: CancellationToken::new(),
        }
    }

    /// Drives `fut` until it completes, the caller cancels, or the deadline passes.
    ///
    /// Cancellation is checked first, so a cancelled caller sees
    /// [`Interrupted::Cancelled`] even if the deadline has also elapsed.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(Interrupted::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_within_deadline() {
        let ctx = RequestContext::new(Duration::from_secs(5));
        let out = ctx.run(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = RequestContext::new(Duration::from_millis(50));
        let out = ctx
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(out, Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_deadline() {
        let token = CancellationToken::new();
        let ctx = RequestContext::with_cancel(Duration::ZERO, token.clone());
        token.cancel();
        let out = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(out, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_detached_ignores_caller_cancel() {
        let ctx = RequestContext::new(Duration::from_secs(5));
        let detached = ctx.detached();
        ctx.cancel_token().cancel();
        assert!(ctx.is_cancelled());
        assert!(!detached.is_cancelled());
        assert_eq!(detached.deadline(), ctx.deadline());
        assert_eq!(detached.run(async { "ok" }).await, Ok("ok"));
    }
}
