use super::backend::{EngineCallback, EngineError, EngineRequest, RecognitionEngine, SessionHandle};
use crate::status::{StatusCode, TranscriptionResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One scripted engine emission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStep {
    pub status: StatusCode,

    #[serde(default)]
    pub data: Option<String>,

    /// Wait before emitting this step
    #[serde(default)]
    pub delay_ms: u64,
}

impl ScriptStep {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            data: None,
            delay_ms: 0,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn after_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn result(&self) -> TranscriptionResult {
        match &self.data {
            Some(data) => TranscriptionResult::with_data(self.status, data.clone()),
            None => TranscriptionResult::new(self.status),
        }
    }
}

/// Emissions replayed by [`ScriptedEngine`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineScript {
    /// Transcription sessions
    #[serde(default)]
    pub steps: Vec<ScriptStep>,

    /// Keep the session open after the steps until it is stopped
    #[serde(default)]
    pub hold_until_stopped: bool,

    /// Keyword recognition sessions
    #[serde(default)]
    pub recognition: Vec<ScriptStep>,
}

impl EngineScript {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let script_error = |reason: String| EngineError::Script {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| script_error(e.to_string()))?;
        let script: EngineScript = serde_json::from_reader(file).map_err(|e| script_error(e.to_string()))?;

        info!(
            "Loaded engine script {} ({} steps, {} recognition steps)",
            path.display(),
            script.steps.len(),
            script.recognition.len()
        );

        Ok(script)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Transcription,
    Explicit,
    Recognition,
}

struct WorkerSlot {
    flavor: Flavor,
    callback: EngineCallback,
    logs_path: Option<PathBuf>,
    stop_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    generation: u64,
}

type Registry = Arc<Mutex<HashMap<SessionHandle, WorkerSlot>>>;

/// Engine that replays a script on one worker thread per session
///
/// Handles are allocated from a monotonically increasing counter. Stop
/// requests reach the worker through a channel; a dropped channel counts as
/// a stop request. After its script (and the stop request, when holding)
/// a worker emits `STOPPED`, unless the script itself ended on a terminal
/// status. A restarted handle waits for its previous worker to finish, so
/// each run's `STOPPED` precedes the next run's `STARTED`.
pub struct ScriptedEngine {
    script: EngineScript,
    next_id: AtomicU64,
    workers: Registry,
}

impl ScriptedEngine {
    pub fn new(script: EngineScript) -> Self {
        Self {
            script,
            next_id: AtomicU64::new(0),
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of handles the engine still tracks
    pub fn active_handles(&self) -> usize {
        self.lock_workers().len()
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, HashMap<SessionHandle, WorkerSlot>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn validate(&self, request: &EngineRequest) -> Result<(), EngineError> {
        if !request.model_path.exists() {
            return Err(EngineError::ModelNotFound(request.model_path.clone()));
        }
        if request.credential.secret.is_empty() {
            return Err(EngineError::MissingCredential);
        }
        Ok(())
    }

    fn allocate(&self, flavor: Flavor, callback: EngineCallback, logs_path: Option<PathBuf>) -> SessionHandle {
        let handle = SessionHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.lock_workers().insert(
            handle,
            WorkerSlot {
                flavor,
                callback,
                logs_path,
                stop_tx: None,
                worker: None,
                generation: 0,
            },
        );
        handle
    }

    fn spawn_worker(&self, handle: SessionHandle) {
        self.join_previous_run(handle);

        let mut workers = self.lock_workers();
        let Some(slot) = workers.get_mut(&handle) else {
            debug!("Ignoring start for unknown handle {}", handle);
            return;
        };
        if slot.stop_tx.is_some() {
            debug!("Handle {} is already running", handle);
            return;
        }

        let steps = match slot.flavor {
            Flavor::Recognition => self.script.recognition.clone(),
            Flavor::Transcription | Flavor::Explicit => self.script.steps.clone(),
        };
        let hold = self.script.hold_until_stopped && slot.flavor != Flavor::Recognition;

        let (stop_tx, stop_rx) = mpsc::channel();
        slot.stop_tx = Some(stop_tx);
        slot.generation += 1;

        let worker = Worker {
            handle,
            generation: slot.generation,
            flavor: slot.flavor,
            callback: Arc::clone(&slot.callback),
            log: slot.logs_path.as_deref().and_then(open_log),
            registry: Arc::clone(&self.workers),
        };
        slot.worker = Some(thread::spawn(move || worker.run(steps, hold, stop_rx)));
    }

    fn join_previous_run(&self, handle: SessionHandle) {
        let previous = match self.lock_workers().get_mut(&handle) {
            Some(slot) if slot.stop_tx.is_none() => slot.worker.take(),
            _ => None,
        };
        let Some(previous) = previous else {
            return;
        };

        // Restarted from inside its own callback: that run has nothing left to emit.
        if previous.thread().id() == thread::current().id() {
            return;
        }
        if previous.join().is_err() {
            warn!("Previous worker for {} panicked", handle);
        }
    }

    fn request_stop(&self, handle: SessionHandle) {
        let mut workers = self.lock_workers();
        if let Some(stop_tx) = workers.get_mut(&handle).and_then(|slot| slot.stop_tx.take()) {
            // The worker may already be gone; the dropped sender covers that case.
            let _ = stop_tx.send(());
        }
    }

    fn forget(&self, handle: SessionHandle) {
        // Dropping the slot drops the stop sender, which stops a running worker.
        if self.lock_workers().remove(&handle).is_some() {
            debug!("Released handle {}", handle);
        }
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create(&self, request: EngineRequest, callback: EngineCallback) -> Result<SessionHandle, EngineError> {
        self.validate(&request)?;
        let handle = self.allocate(Flavor::Explicit, callback, request.logs_path.clone());
        info!(
            "Created session {} for model {} ({}, {} phrases)",
            handle,
            request.model_name,
            input_name(&request),
            request.phrases.len()
        );
        Ok(handle)
    }

    fn start(&self, handle: SessionHandle) {
        self.spawn_worker(handle);
    }

    fn stop(&self, handle: SessionHandle) {
        self.request_stop(handle);
    }

    fn dispose(&self, handle: SessionHandle) {
        self.forget(handle);
    }

    fn transcribe(&self, request: EngineRequest, callback: EngineCallback) -> Result<SessionHandle, EngineError> {
        self.validate(&request)?;
        let handle = self.allocate(Flavor::Transcription, callback, request.logs_path.clone());
        info!(
            "Transcribing session {} with model {} ({})",
            handle,
            request.model_name,
            input_name(&request)
        );
        self.spawn_worker(handle);
        Ok(handle)
    }

    fn untranscribe(&self, handle: SessionHandle) {
        self.request_stop(handle);
    }

    fn recognize(&self, model_path: &Path, callback: EngineCallback) -> Result<SessionHandle, EngineError> {
        if !model_path.exists() {
            return Err(EngineError::ModelNotFound(model_path.to_path_buf()));
        }
        let handle = self.allocate(Flavor::Recognition, callback, None);
        info!("Recognizing keywords in session {}", handle);
        self.spawn_worker(handle);
        Ok(handle)
    }

    fn unrecognize(&self, handle: SessionHandle) {
        self.request_stop(handle);
    }
}

fn input_name(request: &EngineRequest) -> String {
    match &request.wav_path {
        Some(path) => format!("file {}", path.display()),
        None => "default microphone".to_string(),
    }
}

fn open_log(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            warn!("Failed to open engine log {}: {}", path.display(), e);
            None
        }
    }
}

struct Worker {
    handle: SessionHandle,
    generation: u64,
    flavor: Flavor,
    callback: EngineCallback,
    log: Option<File>,
    registry: Registry,
}

impl Worker {
    fn run(mut self, steps: Vec<ScriptStep>, hold: bool, stop_rx: mpsc::Receiver<()>) {
        debug!("Worker for {} started", self.handle);

        let mut stopped = false;
        let mut ended_terminal = false;

        for step in &steps {
            if stop_requested(&stop_rx, step.delay_ms) {
                stopped = true;
                break;
            }

            self.emit(step.result());

            if step.status.is_terminal() {
                ended_terminal = true;
                break;
            }
        }

        if hold && !stopped && !ended_terminal {
            // Blocks until stop is sent or the sender is dropped.
            let _ = stop_rx.recv();
        }

        if !ended_terminal {
            self.emit(TranscriptionResult::new(StatusCode::Stopped));
        }

        self.finish();
    }

    fn emit(&mut self, result: TranscriptionResult) {
        if let Some(log) = self.log.as_mut() {
            let line = match result.data() {
                Some(data) => format!("{} {} {}", self.handle, result.status(), data),
                None => format!("{} {}", self.handle, result.status()),
            };
            if let Err(e) = writeln!(log, "{line}") {
                warn!("Failed to write engine log: {}", e);
            }
        }
        (self.callback)(Ok(result));
    }

    fn finish(self) {
        let mut workers = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let current = workers
            .get(&self.handle)
            .is_some_and(|slot| slot.generation == self.generation);
        if !current {
            return;
        }

        match self.flavor {
            Flavor::Explicit => {
                if let Some(slot) = workers.get_mut(&self.handle) {
                    slot.stop_tx = None;
                }
            }
            Flavor::Transcription | Flavor::Recognition => {
                workers.remove(&self.handle);
            }
        }

        debug!("Worker for {} finished", self.handle);
    }
}

/// Wait out a step delay; true if a stop arrived first
fn stop_requested(stop_rx: &mpsc::Receiver<()>, delay_ms: u64) -> bool {
    if delay_ms == 0 {
        return !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty));
    }
    !matches!(
        stop_rx.recv_timeout(Duration::from_millis(delay_ms)),
        Err(RecvTimeoutError::Timeout)
    )
}
