use std::time::Duration;

/// Bound on delivery attempts of one queued send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    /// Retry until the send is cancelled or the manager shuts down.
    Unbounded,
    /// Fail the send with [`crate::FabricError::Unreachable`] once this many
    /// attempts found no replica.
    MaxAttempts(u32),
}

/// Tuning of an [`crate::EndPointManager`].
#[derive(Debug, Clone)]
pub struct FabricConfig {
    tx_queue_capacity: usize,
    rx_queue_capacity: usize,
    retry_base: Duration,
    retry_limit: RetryLimit,
}

impl FabricConfig {
    pub fn new() -> Self {
        Self {
            tx_queue_capacity: 128,
            rx_queue_capacity: 128,
            retry_base: Duration::from_secs(1),
            retry_limit: RetryLimit::Unbounded,
        }
    }

    /// Capacity of the manager's pending-send queue.
    pub fn with_tx_queue_capacity(mut self, capacity: usize) -> Self {
        self.tx_queue_capacity = capacity.max(1);
        self
    }

    /// Capacity of each logical end point's receive queue.
    pub fn with_rx_queue_capacity(mut self, capacity: usize) -> Self {
        self.rx_queue_capacity = capacity.max(1);
        self
    }

    /// Base of the exponential retry backoff.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn with_retry_limit(mut self, limit: RetryLimit) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn tx_queue_capacity(&self) -> usize {
        self.tx_queue_capacity
    }

    pub fn rx_queue_capacity(&self) -> usize {
        self.rx_queue_capacity
    }

    pub fn retry_limit(&self) -> RetryLimit {
        self.retry_limit
    }

    /// Backoff before re-queueing attempt `attempt + 1`: grows as
    /// `retry_base * 2^(attempt - 1)`, clamped on overflow.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.retry_base.saturating_mul(factor)
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self::new()
    }
}
