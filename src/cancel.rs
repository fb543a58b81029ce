use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Caller-owned cancellation token
///
/// Cloning shares the same token. Sessions register one listener each and
/// remove it when they finish; the signal never owns a session.
#[derive(Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, Listener>>,
}

/// Registration returned by [`CancellationSignal::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener invoked when the signal is cancelled
    ///
    /// A listener registered after cancellation is never invoked.
    pub fn register<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut listeners = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.insert(id, Arc::new(listener));
        Subscription(id)
    }

    /// Remove a listener; returns false if it was already gone
    pub fn unregister(&self, subscription: Subscription) -> bool {
        let mut listeners = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.remove(&subscription.0).is_some()
    }

    /// Trigger the signal
    ///
    /// Listeners run on the calling thread, outside the registry lock, so a
    /// listener may unregister itself. Only the first call fires.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let listeners: Vec<Listener> = {
            let listeners = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.values().cloned().collect()
        };

        debug!("Cancellation signal fired ({} listeners)", listeners.len());

        for listener in listeners {
            listener();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is cancelled
    ///
    /// The listener is removed when the future completes or is dropped.
    pub async fn cancelled(&self) {
        let notify = Arc::new(Notify::new());
        let notifier = Arc::clone(&notify);
        let _registration = Registration {
            signal: self,
            subscription: self.register(move || notifier.notify_one()),
        };

        // A cancel after registration leaves a permit behind.
        if !self.is_cancelled() {
            notify.notified().await;
        }
    }

    /// Number of live registrations
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct Registration<'a> {
    signal: &'a CancellationSignal,
    subscription: Subscription,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.signal.unregister(self.subscription);
    }
}

impl std::fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("cancelled", &self.is_cancelled())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
