//! Helpers for managing tokio tasks.

use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// RAII guard that aborts a Tokio task when dropped.
///
/// Useful for ensuring background tasks do not outlive their scope.
#[must_use]
pub struct AbortOnDrop<T> {
    handle: Option<JoinHandle<T>>,
}

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Check whether the task is done, without waiting.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait for the task to finish and return its result.
    pub async fn join(mut self) -> Result<T, JoinError> {
        match self.handle.take() {
            Some(handle) => handle.await,
            // Only drop takes the handle otherwise.
            None => unreachable!(),
        }
    }
}

impl<T> Drop for AbortOnDrop<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Sleep for the given duration, unless cancelled first.
///
/// Returns false if the token was cancelled.
pub async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select!(
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn abort_on_drop() -> anyhow::Result<()> {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let guard = AbortOnDrop::new(tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        }));
        drop(guard);

        // The task owned tx; aborting it drops the sender.
        assert!(rx.await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn join_returns_result() -> anyhow::Result<()> {
        let guard = AbortOnDrop::new(tokio::spawn(async { 42 }));
        assert_eq!(42, guard.join().await?);

        Ok(())
    }

    #[tokio::test]
    async fn sleep_interrupted_by_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(3600), &token).await);
        assert!(sleep_or_cancel(Duration::from_millis(1), &CancellationToken::new()).await);
    }
}
