//! Cancellable execution contexts

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use async_io::Timer;
use futures_lite::future;
use thiserror::Error;

/// Why an execution context ended
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context was cancelled explicitly
    #[error("context cancelled")]
    Cancelled,
    /// The context's deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellable context governing command execution
///
/// Clones share cancellation state: cancelling one cancels all of them.
/// A context is cancelled by closing an internal channel, so any number
/// of waiters observe it at once.
#[derive(Debug, Clone)]
pub struct ExecContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    deadline: Option<Instant>,
}

impl ExecContext {
    /// Create a context that ends only when cancelled
    pub fn new() -> Self {
        Self::with_optional_deadline(None)
    }

    /// A context that is never cancelled by anyone but its holder
    pub fn background() -> Self {
        Self::new()
    }

    /// Create a context that ends after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Create a context that ends at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::with_optional_deadline(Some(deadline))
    }

    fn with_optional_deadline(deadline: Option<Instant>) -> Self {
        let (cancel_tx, cancel_rx) = async_channel::bounded(1);
        Self {
            inner: Arc::new(Inner {
                cancel_tx,
                cancel_rx,
                deadline,
            }),
        }
    }

    /// Cancel the context
    pub fn cancel(&self) {
        self.inner.cancel_tx.close();
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Why the context ended, or `None` if it is still live
    pub fn err(&self) -> Option<ContextError> {
        if self.inner.cancel_tx.is_closed() {
            return Some(ContextError::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context ends
    pub async fn done(&self) -> ContextError {
        let cancelled = async {
            // Nothing is ever sent; recv only returns once the channel is closed
            let _ = self.inner.cancel_rx.recv().await;
            ContextError::Cancelled
        };

        match self.inner.deadline {
            Some(deadline) => {
                let expired = async move {
                    Timer::at(deadline).await;
                    ContextError::DeadlineExceeded
                };
                future::or(cancelled, expired).await
            }
            None => cancelled.await,
        }
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_live() {
        let ctx = ExecContext::new();
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.deadline(), None);
    }

    #[smol_potat::test]
    async fn test_cancel_is_shared_by_clones() {
        let ctx = ExecContext::new();
        let clone = ctx.clone();
        clone.cancel();

        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
        assert_eq!(ctx.done().await, ContextError::Cancelled);
    }

    #[smol_potat::test]
    async fn test_deadline_expires() {
        let ctx = ExecContext::with_timeout(Duration::from_millis(20));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[smol_potat::test]
    async fn test_cancel_wins_over_later_deadline() {
        let ctx = ExecContext::with_timeout(Duration::from_secs(60));
        ctx.cancel();
        assert_eq!(ctx.done().await, ContextError::Cancelled);
    }
}
