use crate::{Result, SyncError};
use std::time::Duration;
use tokio::sync::watch;

/// Cooperative cancellation for a sync run.
///
/// - `cancel()` sets the flag and wakes every waiter, whether or not anyone
///   is subscribed yet.
/// - `reset()` clears the flag so the next run can proceed.
/// - Receivers created after `cancel()` observe the flag immediately.
///
/// ```rust
/// use listen_sync::cancel::sleep_with_cancel;
/// use listen_sync::{CancellationState, SyncError};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let state = CancellationState::new();
/// state.cancel();
///
/// let result = sleep_with_cancel(state.subscribe(), Duration::from_secs(3600)).await;
/// assert!(matches!(result, Err(SyncError::Cancelled)));
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct CancellationState {
    tx: watch::Sender<bool>,
}

impl Default for CancellationState {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolve once the flag is set. Never resolves if the sender is gone first.
pub async fn cancelled(mut cancel_rx: watch::Receiver<bool>) {
    if cancel_rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `duration` unless cancellation is signalled first.
///
/// Returns [`SyncError::Cancelled`] if the flag is already set or becomes set
/// while waiting.
pub async fn sleep_with_cancel(cancel_rx: watch::Receiver<bool>, duration: Duration) -> Result<()> {
    if *cancel_rx.borrow() {
        return Err(SyncError::Cancelled);
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancelled(cancel_rx) => Err(SyncError::Cancelled),
    }
}
