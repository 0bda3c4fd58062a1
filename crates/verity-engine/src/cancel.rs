//! Cancellation signalling between control callbacks and a running job

use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected handle and signal
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(Arc::new(tx)), CancelSignal(rx))
}

/// Requests cancellation, held by whoever may cancel the job
#[derive(Clone, Debug)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Observes cancellation, held by the running job
#[derive(Clone, Debug)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// Signal that is never raised
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    pub fn is_requested(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once cancellation has been requested. Pends forever if every
    /// handle is gone without cancelling.
    pub async fn requested(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let (handle, mut signal) = cancel_pair();
        assert!(!signal.is_requested());

        let waiter = tokio::spawn(async move {
            signal.requested().await;
            signal.is_requested()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let observed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(observed);
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_before_wait() {
        let (handle, mut signal) = cancel_pair();
        handle.cancel();
        tokio::time::timeout(Duration::from_millis(100), signal.requested())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_stays_pending() {
        let mut signal = CancelSignal::never();
        let result = tokio::time::timeout(Duration::from_millis(50), signal.requested()).await;
        assert!(result.is_err());
    }
}
