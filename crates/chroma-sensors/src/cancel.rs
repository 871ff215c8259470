//! Cooperative cancellation token

use tokio::sync::watch;

use crate::error::{Result, SensorError};

/// Cloneable cancellation flag
///
/// Clones observe the same flag. Drivers call [`Cancellable::check`] before
/// each transport call; a transfer already in flight runs to completion.
#[derive(Debug, Clone)]
pub struct Cancellable {
    tx: watch::Sender<bool>,
}

impl Default for Cancellable {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellable {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(SensorError::Cancelled("operation was cancelled".to_string()));
        }
        Ok(())
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot see a closed channel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clones_share_flag() {
        let token = Cancellable::new();
        let other = token.clone();
        assert!(token.check().is_ok());

        other.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(SensorError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = Cancellable::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let token = Cancellable::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}
