use std::sync::Arc;
use std::sync::OnceLock;

use tokio_util::sync::CancellationToken;

/// A one-shot completion signal carrying an outcome.
///
/// The first [`Completion::complete`] wins; later calls are ignored. Waiters
/// observe the stored outcome, before or after the fact. Clones share the
/// same signal.
#[derive(Debug, Clone)]
pub struct Completion<T> {
    inner: Arc<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    done: CancellationToken,
    outcome: OnceLock<T>,
}

impl<T: Clone + Send + Sync + 'static> Completion<T> {
    pub fn new() -> Self {
        Self { inner: Arc::new(Inner { done: CancellationToken::new(), outcome: OnceLock::new() }) }
    }

    /// Fulfils the signal. Returns `false` when it was already fulfilled.
    pub fn complete(&self, outcome: T) -> bool {
        // The outcome is stored before the token fires, so any woken waiter
        // observes it.
        let won = self.inner.outcome.set(outcome).is_ok();
        if won {
            self.inner.done.cancel();
        }
        won
    }

    pub fn is_complete(&self) -> bool {
        self.inner.done.is_cancelled()
    }

    /// The outcome, when already fulfilled.
    pub fn try_get(&self) -> Option<T> {
        if self.inner.done.is_cancelled() {
            self.inner.outcome.get().cloned()
        } else {
            None
        }
    }

    /// Waits for fulfilment and returns the outcome.
    pub async fn wait(&self) -> T {
        loop {
            if self.inner.done.is_cancelled() {
                if let Some(outcome) = self.inner.outcome.get() {
                    return outcome.clone();
                }
            }
            self.inner.done.cancelled().await;
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_completion_wins() {
        let signal = Completion::new();
        assert!(signal.complete(1));
        assert!(!signal.complete(2));
        assert_eq!(signal.wait().await, 1);
        assert_eq!(signal.try_get(), Some(1));
    }

    #[tokio::test]
    async fn waiters_wake_on_completion() {
        let signal = Completion::<u32>::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!signal.is_complete());
        signal.complete(7);
        assert_eq!(waiter.await.expect("waiter"), 7);
    }

    #[tokio::test]
    async fn try_get_before_completion_is_none() {
        let signal = Completion::<u32>::new();
        assert_eq!(signal.try_get(), None);
    }
}
