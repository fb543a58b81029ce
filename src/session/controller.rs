use super::config::{RecognitionOptions, SessionOptions};
use super::session::{lock, EventSink, SessionCore, Teardown, TeardownCause, TeardownHook};
use super::stats::{SessionState, SessionStats};
use super::SessionError;
use crate::engine::{EngineEvent, RecognitionEngine, SessionHandle};
use crate::status::TranscriptionResult;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// Session controller bound to one process-wide engine
///
/// Every logical operation gets its own engine handle; the controller never
/// shares a handle between operations.
#[derive(Clone)]
pub struct SessionController {
    engine: Arc<dyn RecognitionEngine>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn RecognitionEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn RecognitionEngine> {
        &self.engine
    }

    /// Create and start a transcription session in one call
    ///
    /// The callback receives `Err` for engine failures and `Ok` results,
    /// including `ERROR` statuses, in engine order. Nothing is delivered
    /// after the session is cancelled or untranscribed.
    pub fn transcribe<F>(&self, options: SessionOptions, callback: F) -> Result<Transcription, SessionError>
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        self.open_transcription(options, Box::new(callback), None)
    }

    /// [`Self::transcribe`] with results delivered over a channel
    ///
    /// The channel closes after the terminal event or on teardown.
    pub fn transcribe_stream(
        &self,
        options: SessionOptions,
    ) -> Result<(Transcription, mpsc::UnboundedReceiver<EngineEvent>), SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = Arc::new(Mutex::new(Some(tx)));

        let sink_sender = Arc::clone(&sender);
        let sink: EventSink = Box::new(move |event: EngineEvent| {
            let terminal = match &event {
                Ok(result) => result.is_terminal(),
                Err(_) => true,
            };
            let mut slot = lock(&sink_sender);
            if let Some(tx) = slot.as_ref() {
                let _ = tx.send(event);
            }
            if terminal {
                slot.take();
            }
        });
        let close: TeardownHook = Box::new(move || {
            lock(&sender).take();
        });

        let transcription = self.open_transcription(options, sink, Some(close))?;
        Ok((transcription, rx))
    }

    fn open_transcription(
        &self,
        options: SessionOptions,
        sink: EventSink,
        hook: Option<TeardownHook>,
    ) -> Result<Transcription, SessionError> {
        let request = options.prepare()?;

        let core = SessionCore::new(Arc::clone(&self.engine), Teardown::Untranscribe, false, options.signal, sink);
        if let Some(hook) = hook {
            core.on_teardown(hook);
        }

        let handle = self.engine.transcribe(request, core.engine_callback())?;
        core.attach(handle, true);
        info!("Transcription {} started on {} engine", handle, self.engine.name());

        Ok(Transcription { core })
    }

    /// Create an idle transcriber driven with `start`/`stop`/`dispose`
    pub fn create_transcriber<F>(&self, options: SessionOptions, callback: F) -> Result<Transcriber, SessionError>
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        let request = options.prepare()?;

        let core = SessionCore::new(
            Arc::clone(&self.engine),
            Teardown::Dispose,
            true,
            options.signal,
            Box::new(callback),
        );
        let handle = self.engine.create(request, core.engine_callback())?;
        core.attach(handle, false);
        info!("Transcriber {} created on {} engine", handle, self.engine.name());

        Ok(Transcriber { core })
    }

    /// Start keyword recognition with a repeating callback
    pub fn recognize<F>(&self, options: RecognitionOptions, callback: F) -> Result<Recognition, SessionError>
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        self.open_recognition(options, Box::new(callback), None)
    }

    /// Keyword recognition settled by the first engine callback
    ///
    /// Cancellation settles with [`SessionError::Cancelled`]. The engine
    /// handle is released however the future ends.
    pub async fn recognize_once(&self, options: RecognitionOptions) -> Result<TranscriptionResult, SessionError> {
        type Settle = Arc<dyn Fn(Result<TranscriptionResult, SessionError>) + Send + Sync>;

        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let settle: Settle = Arc::new(move |outcome: Result<TranscriptionResult, SessionError>| {
            let tx = lock(&slot).take();
            if let Some(tx) = tx {
                let _ = tx.send(outcome);
            }
        });

        let on_event = Arc::clone(&settle);
        let sink: EventSink = Box::new(move |event: EngineEvent| on_event(event.map_err(SessionError::from)));
        let hook: TeardownHook = Box::new(move || settle(Err(SessionError::Cancelled)));

        let recognition = ReleaseOnDrop(self.open_recognition(options, sink, Some(hook))?);

        let outcome = rx.await.unwrap_or(Err(SessionError::Cancelled));
        drop(recognition);
        outcome
    }

    fn open_recognition(
        &self,
        options: RecognitionOptions,
        sink: EventSink,
        hook: Option<TeardownHook>,
    ) -> Result<Recognition, SessionError> {
        options.prepare()?;

        let core = SessionCore::new(Arc::clone(&self.engine), Teardown::Unrecognize, false, options.signal, sink);
        if let Some(hook) = hook {
            core.on_teardown(hook);
        }

        let handle = self.engine.recognize(&options.model_path, core.engine_callback())?;
        core.attach(handle, true);
        info!("Keyword recognition {} started on {} engine", handle, self.engine.name());

        Ok(Recognition { core })
    }
}

/// Fire-and-forget transcription
///
/// Dropping this value does not stop the session; use
/// [`Transcription::untranscribe`] or the cancellation signal.
pub struct Transcription {
    core: Arc<SessionCore>,
}

impl Transcription {
    pub fn handle(&self) -> SessionHandle {
        self.core.handle()
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Whether the session has ended by completion, cancellation, or untranscribe
    pub fn is_finished(&self) -> bool {
        self.core.is_torn_down()
    }

    /// Stop the session; repeated calls are no-ops
    pub fn untranscribe(&self) {
        self.core.teardown(TeardownCause::Requested);
    }
}

/// Explicitly driven transcription session
///
/// Dropping the transcriber disposes it.
pub struct Transcriber {
    core: Arc<SessionCore>,
}

impl Transcriber {
    pub fn handle(&self) -> SessionHandle {
        self.core.handle()
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.core.stats()
    }

    /// Start, or restart after a stop
    pub fn start(&self) {
        self.core.start();
    }

    pub fn stop(&self) {
        self.core.stop();
    }

    /// Release the engine session; later calls on this transcriber do nothing
    pub fn dispose(&self) {
        self.core.teardown(TeardownCause::Requested);
    }
}

impl Drop for Transcriber {
    fn drop(&mut self) {
        self.core.teardown(TeardownCause::Dropped);
    }
}

/// Keyword recognition with a repeating callback
pub struct Recognition {
    core: Arc<SessionCore>,
}

impl Recognition {
    pub fn handle(&self) -> SessionHandle {
        self.core.handle()
    }

    pub fn is_finished(&self) -> bool {
        self.core.is_torn_down()
    }

    /// Stop recognition; repeated calls are no-ops
    pub fn unrecognize(&self) {
        self.core.teardown(TeardownCause::Requested);
    }
}

struct ReleaseOnDrop(Recognition);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.unrecognize();
    }
}
