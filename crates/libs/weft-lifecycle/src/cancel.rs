use tokio_util::sync::{CancellationToken, DropGuard};

/// Cancellation fed by two sources.
///
/// [`linked`] merges an external cancellation with a component's disposal
/// token: the linked token fires when either input does, so inner code sees
/// one cancellation regardless of the cause. Dropping the value detaches the
/// watcher task.
#[derive(Debug)]
pub struct LinkedCancellation {
    token: CancellationToken,
    _detach: DropGuard,
}

impl LinkedCancellation {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Links two cancellation sources into one token.
///
/// Must be called within a tokio runtime; the watcher is a spawned task that
/// exits when either source fires or the returned value is dropped.
pub fn linked(first: &CancellationToken, second: &CancellationToken) -> LinkedCancellation {
    let token = CancellationToken::new();
    let detach = CancellationToken::new();

    let linked = token.clone();
    let stop = detach.clone();
    let first = first.clone();
    let second = second.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = first.cancelled() => linked.cancel(),
            _ = second.cancelled() => linked.cancel(),
            _ = stop.cancelled() => {}
        }
    });

    LinkedCancellation { token, _detach: detach.drop_guard() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_when_first_source_fires() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let link = linked(&a, &b);

        a.cancel();
        link.cancelled().await;
        assert!(link.is_cancelled());
    }

    #[tokio::test]
    async fn fires_when_second_source_fires() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let link = linked(&a, &b);

        b.cancel();
        link.cancelled().await;
        assert!(link.is_cancelled());
    }

    #[tokio::test]
    async fn quiet_sources_leave_the_link_untriggered() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let link = linked(&a, &b);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!link.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_source_fires_immediately() {
        let a = CancellationToken::new();
        a.cancel();
        let link = linked(&a, &CancellationToken::new());
        link.cancelled().await;
    }
}
