use super::stats::{SessionState, SessionStats};
use crate::cancel::{CancellationSignal, Subscription};
use crate::engine::{EngineCallback, EngineEvent, RecognitionEngine, SessionHandle};
use crate::status::StatusCode;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// Caller-side receiver of normalized engine events
pub(crate) type EventSink = Box<dyn Fn(EngineEvent) + Send + Sync>;

pub(crate) type TeardownHook = Box<dyn FnOnce() + Send>;

/// Engine primitive that releases the handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    Untranscribe,
    Dispose,
    Unrecognize,
}

/// Why a session was torn down, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeardownCause {
    Cancelled,
    Requested,
    Dropped,
}

/// Lifecycle state plus caller stops the engine has not acknowledged yet
///
/// A STOPPED that acknowledges a stop issued before a restart must not move
/// the restarted session back to `Stopped`.
struct Lifecycle {
    state: SessionState,
    unacked_stops: usize,
}

/// One engine session handle and its lifecycle
///
/// `torn_down` is the single guard for every exit path: whichever of
/// cancellation, explicit teardown, or natural completion flips it first
/// releases the signal registration, and only the first two call the
/// engine's teardown primitive. Delivery and teardown are serialized, so no
/// event reaches the caller once a teardown call has returned.
pub(crate) struct SessionCore {
    engine: Arc<dyn RecognitionEngine>,
    teardown: Teardown,
    /// Explicit-object sessions survive STOPPED/ERROR and can be restarted
    restartable: bool,
    handle: OnceLock<SessionHandle>,
    lifecycle: Mutex<Lifecycle>,
    torn_down: AtomicBool,
    /// Held for the whole of one event delivery
    delivery: Mutex<()>,
    /// Thread currently inside the sink, so it can tear down reentrantly
    delivering_thread: Mutex<Option<ThreadId>>,
    signal: CancellationSignal,
    subscription: Mutex<Option<Subscription>>,
    sink: EventSink,
    teardown_hook: Mutex<Option<TeardownHook>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    events_delivered: AtomicUsize,
    start_count: AtomicUsize,
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionCore {
    pub(crate) fn new(
        engine: Arc<dyn RecognitionEngine>,
        teardown: Teardown,
        restartable: bool,
        signal: CancellationSignal,
        sink: EventSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            teardown,
            restartable,
            handle: OnceLock::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Created,
                unacked_stops: 0,
            }),
            torn_down: AtomicBool::new(false),
            delivery: Mutex::new(()),
            delivering_thread: Mutex::new(None),
            signal,
            subscription: Mutex::new(None),
            sink,
            teardown_hook: Mutex::new(None),
            started_at: Mutex::new(None),
            events_delivered: AtomicUsize::new(0),
            start_count: AtomicUsize::new(0),
        })
    }

    /// Run `hook` once when the session is torn down, whatever the cause
    ///
    /// Must be installed before [`Self::attach`].
    pub(crate) fn on_teardown(&self, hook: TeardownHook) {
        *lock(&self.teardown_hook) = Some(hook);
    }

    /// Callback handed to the engine
    pub(crate) fn engine_callback(self: &Arc<Self>) -> EngineCallback {
        let core = Arc::clone(self);
        Arc::new(move |event| core.on_event(event))
    }

    /// Bind the engine handle and subscribe to the cancellation signal
    pub(crate) fn attach(self: &Arc<Self>, handle: SessionHandle, started: bool) {
        if self.handle.set(handle).is_err() {
            warn!("Session already attached to {}", self.handle());
            return;
        }
        if started {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state == SessionState::Created {
                lifecycle.state = SessionState::Running;
            }
            drop(lifecycle);
            self.record_start();
        }

        let weak = Arc::downgrade(self);
        let subscription = self.signal.register(move || {
            if let Some(core) = weak.upgrade() {
                core.teardown(TeardownCause::Cancelled);
            }
        });
        *lock(&self.subscription) = Some(subscription);

        // Completion or cancellation may have raced the registration.
        if self.torn_down.load(Ordering::SeqCst) {
            self.release_subscription();
        } else if self.signal.is_cancelled() {
            self.teardown(TeardownCause::Cancelled);
        }
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        self.handle.get().copied().unwrap_or(SessionHandle(u64::MAX))
    }

    pub(crate) fn state(&self) -> SessionState {
        lock(&self.lifecycle).state
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub(crate) fn stats(&self) -> SessionStats {
        SessionStats {
            handle: self.handle().0,
            state: self.state(),
            started_at: *lock(&self.started_at),
            events_delivered: self.events_delivered.load(Ordering::SeqCst),
            start_count: self.start_count.load(Ordering::SeqCst),
        }
    }

    fn record_start(&self) {
        *lock(&self.started_at) = Some(Utc::now());
        self.start_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Start or restart an explicit-object session
    pub(crate) fn start(&self) {
        if self.is_torn_down() {
            debug!("Ignoring start on torn-down session {}", self.handle());
            return;
        }
        {
            let mut lifecycle = lock(&self.lifecycle);
            if !matches!(lifecycle.state, SessionState::Created | SessionState::Stopped) {
                debug!("Ignoring start on session {} in state {:?}", self.handle(), lifecycle.state);
                return;
            }
            lifecycle.state = SessionState::Running;
        }

        self.record_start();
        info!("Starting session {}", self.handle());
        self.engine.start(self.handle());
    }

    /// Stop an explicit-object session, keeping the handle
    pub(crate) fn stop(&self) {
        if self.is_torn_down() {
            debug!("Ignoring stop on torn-down session {}", self.handle());
            return;
        }
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state != SessionState::Running {
                debug!("Ignoring stop on session {} in state {:?}", self.handle(), lifecycle.state);
                return;
            }
            lifecycle.state = SessionState::Stopped;
            lifecycle.unacked_stops += 1;
        }

        info!("Stopping session {}", self.handle());
        self.engine.stop(self.handle());
    }

    /// Release the handle through the engine's teardown primitive
    ///
    /// Returns false when the session was already torn down.
    pub(crate) fn teardown(&self, cause: TeardownCause) -> bool {
        {
            // Wait out an in-flight delivery, unless this thread is the one delivering.
            let reentrant = *lock(&self.delivering_thread) == Some(thread::current().id());
            let _delivery = (!reentrant).then(|| lock(&self.delivery));
            if self.torn_down.swap(true, Ordering::SeqCst) {
                return false;
            }
        }
        self.release_subscription();

        lock(&self.lifecycle).state = match self.teardown {
            Teardown::Dispose => SessionState::Disposed,
            Teardown::Untranscribe | Teardown::Unrecognize => SessionState::Stopped,
        };

        if let Some(&handle) = self.handle.get() {
            info!("Tearing down session {} ({:?}, {:?})", handle, self.teardown, cause);
            match self.teardown {
                Teardown::Untranscribe => self.engine.untranscribe(handle),
                Teardown::Dispose => self.engine.dispose(handle),
                Teardown::Unrecognize => self.engine.unrecognize(handle),
            }
        }

        let hook = lock(&self.teardown_hook).take();
        if let Some(hook) = hook {
            hook();
        }

        true
    }

    /// The engine released the handle on its own; nothing to call
    fn finish(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.release_subscription();
        debug!("Session {} completed", self.handle());
    }

    fn release_subscription(&self) {
        if let Some(subscription) = lock(&self.subscription).take() {
            self.signal.unregister(subscription);
        }
    }

    fn on_event(&self, event: EngineEvent) {
        let _delivery = lock(&self.delivery);
        if self.is_torn_down() {
            debug!("Dropping event for torn-down session {}", self.handle());
            return;
        }

        let terminal = match &event {
            Ok(result) => {
                self.observe(result.status());
                result.is_terminal()
            }
            Err(fault) => {
                warn!("Engine failure on session {}: {}", self.handle(), fault);
                self.observe(StatusCode::Error);
                true
            }
        };

        // Completion is recorded before delivery so a caller woken by the
        // terminal event already observes a finished session.
        let engine_disposed = self.state() == SessionState::Disposed;
        if terminal && (!self.restartable || engine_disposed) {
            self.finish();
        }

        self.events_delivered.fetch_add(1, Ordering::SeqCst);
        *lock(&self.delivering_thread) = Some(thread::current().id());
        (self.sink)(event);
        *lock(&self.delivering_thread) = None;
    }

    fn observe(&self, status: StatusCode) {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.state == SessionState::Disposed {
            return;
        }
        match status {
            StatusCode::Started => lifecycle.state = SessionState::Running,
            StatusCode::Stopped if lifecycle.unacked_stops > 0 => {
                lifecycle.unacked_stops -= 1;
                if lifecycle.state == SessionState::Running {
                    debug!("Session {} restarted before its stop was acknowledged", self.handle());
                } else {
                    lifecycle.state = SessionState::Stopped;
                }
            }
            StatusCode::Stopped => lifecycle.state = SessionState::Stopped,
            StatusCode::Error => {
                // A failed run acknowledges nothing further.
                lifecycle.state = SessionState::Stopped;
                lifecycle.unacked_stops = 0;
            }
            StatusCode::Disposed => lifecycle.state = SessionState::Disposed,
            _ => {}
        }
    }
}
