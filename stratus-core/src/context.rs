//! Per-request operation context.
//!
//! Every service operation takes an [`OpContext`] as its first parameter.
//! It carries the caller's cancellation signal and an optional deadline;
//! long-running work checks it between stages and before blocking I/O.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Result, StratusError};

/// Cancellation and deadline for one in-flight operation.
///
/// Cloning is cheap; clones share the same cancellation token, so a clone
/// handed to a background stage observes the caller's cancellation.
#[derive(Debug, Clone)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    caller: Option<String>,
}

impl OpContext {
    /// A context that is never cancelled and has no deadline. Used by
    /// background workers and tests.
    pub fn background() -> Self {
        Self { cancel: CancellationToken::new(), deadline: None, caller: None }
    }

    /// A context cancelled when `cancel` fires.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel, deadline: None, caller: None }
    }

    /// Attach a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Record the caller identity (informational; the core never gates on it).
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline, if one is set. `Some(ZERO)` once the
    /// deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the operation was cancelled or its deadline elapsed.
    ///
    /// Called between pipeline stages and before each blocking call so a
    /// dead request stops consuming resources.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(StratusError::cancelled());
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(StratusError::deadline_exceeded());
            }
        }
        Ok(())
    }

    /// Resolves when the caller cancels. Pairs with `tokio::select!` around
    /// blocking work.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn background_context_passes_check() {
        assert!(OpContext::background().check().is_ok());
    }

    #[test]
    fn cancelled_context_fails_check() {
        let ctx = OpContext::background();
        ctx.cancel();
        let err = ctx.check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn clones_share_cancellation() {
        let ctx = OpContext::background();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn elapsed_deadline_fails_check() {
        let ctx = OpContext::background().with_timeout(Duration::ZERO);
        let err = ctx.check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }

    #[test]
    fn remaining_is_none_without_deadline() {
        assert!(OpContext::background().remaining().is_none());
        let ctx = OpContext::background().with_timeout(Duration::from_secs(60));
        assert!(ctx.remaining().unwrap() > Duration::from_secs(59));
    }
}
