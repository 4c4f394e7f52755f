use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Operation attempted on a disposed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("component is disposed")]
pub struct Disposed;

/// Gate tracking in-flight public operations of a component.
///
/// Operations acquire a [`DisposalGuard`] for their duration. Disposal closes
/// the gate, so new acquisitions fail with [`Disposed`], and then waits until
/// every outstanding guard has dropped. The gate's token is the component's
/// disposal cancellation; loops select on it to terminate.
#[derive(Debug, Clone, Default)]
pub struct DisposalGate {
    inner: Arc<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    closed: CancellationToken,
    active: AtomicUsize,
    idle: Notify,
}

impl DisposalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a guard for the duration of one operation.
    pub fn guard(&self) -> Result<DisposalGuard, Disposed> {
        // Increment first: close() only trusts a zero count after the token
        // is cancelled, so a racing acquire either fails here or is waited on.
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        if self.inner.closed.is_cancelled() {
            release(&self.inner);
            return Err(Disposed);
        }
        Ok(DisposalGuard { inner: self.inner.clone() })
    }

    /// The disposal cancellation observed by the component's loops.
    pub fn token(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Closes the gate and waits for all outstanding guards to drop.
    pub async fn close(&self) {
        self.inner.closed.cancel();
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            // Register interest before re-checking the count, or the final
            // release could slip between the check and the await.
            idle.as_mut().enable();
            if self.inner.active.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// RAII guard for one in-flight operation. Dropping it releases the gate.
#[derive(Debug)]
pub struct DisposalGuard {
    inner: Arc<GateInner>,
}

impl Drop for DisposalGuard {
    fn drop(&mut self) {
        release(&self.inner);
    }
}

fn release(inner: &GateInner) {
    if inner.active.fetch_sub(1, Ordering::AcqRel) == 1 {
        inner.idle.notify_waiters();
    }
}
