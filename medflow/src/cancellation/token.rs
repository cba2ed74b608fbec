//! Cancellation token for caller-driven run cancellation.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Callback invoked with the cancellation reason.
pub type CancelCallback = Box<dyn Fn(&str) + Send + Sync>;

/// A token a caller can trip to stop an in-flight run.
///
/// The sequencer races each stage against [`CancellationToken::cancelled`];
/// when the token fires, the stage future is dropped (releasing any session
/// lease it holds) and the run records a `Cancelled` fault. Only the first
/// reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: RwLock<Vec<CancelCallback>>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared token.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Requests cancellation. Idempotent; the first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let reason = reason.into();
        *self.reason.write() = Some(reason.clone());
        self.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.callbacks.write());
        for callback in &callbacks {
            invoke(callback.as_ref(), &reason);
        }
    }

    /// Registers a callback; runs it immediately if already cancelled.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if let Some(reason) = self.reason() {
            invoke(&callback, &reason);
            return;
        }
        self.callbacks.write().push(Box::new(callback));
        // cancel() may have drained the list between the check and the push
        if let Some(reason) = self.reason() {
            let pending = std::mem::take(&mut *self.callbacks.write());
            for callback in &pending {
                invoke(callback.as_ref(), &reason);
            }
        }
    }

    /// Creates a token that is cancelled whenever this one is.
    #[must_use]
    pub fn child(&self) -> Arc<Self> {
        let child = Self::shared();
        let linked = Arc::clone(&child);
        self.on_cancel(move |reason| linked.cancel(format!("parent cancelled: {reason}")));
        child
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn invoke(callback: &(dyn Fn(&str) + Send + Sync), reason: &str) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(reason))) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish_non_exhaustive()
    }
}
