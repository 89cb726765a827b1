//! Delays between loop iterations and the cooperative shutdown signal.
//!
//! The relay and consumer loops never call `tokio::time::sleep` directly: they go
//! through a [`Scheduler`], which also watches the [`Shutdown`] signal so a pending
//! delay ends as soon as shutdown is requested.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

/// Creates a linked trigger/signal pair.
#[must_use]
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), Shutdown(rx))
}

/// Sending half of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    /// Requests shutdown. Idempotent.
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving half of the shutdown signal; cheap to clone into every loop.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown is requested (or the trigger is gone).
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}

/// Arms a delay that is cancelled by shutdown.
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    /// Waits for `delay`. Returns `false` if shutdown was requested first.
    async fn sleep(&self, delay: Duration, shutdown: &mut Shutdown) -> bool;
}

/// [`Scheduler`] backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, delay: Duration, shutdown: &mut Shutdown) -> bool {
        tokio::select! {
            biased;
            () = shutdown.wait() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}
