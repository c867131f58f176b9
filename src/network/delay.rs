//! Pacing between inbound messages

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Cancellable wait used by the receive loops
#[async_trait]
pub trait Delayer: Send + Sync {
    /// Wait for `duration`. Returns false if `cancel` fired first.
    async fn delay(&self, duration: Duration, cancel: &CancellationToken) -> bool;
}

/// Delayer backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelayer;

#[async_trait]
impl Delayer for TokioDelayer {
    async fn delay(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delay_completes() {
        let token = CancellationToken::new();
        assert!(TokioDelayer.delay(Duration::from_millis(1), &token).await);
    }

    #[tokio::test]
    async fn test_delay_observes_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(!TokioDelayer.delay(Duration::from_secs(60), &token).await);
    }
}
