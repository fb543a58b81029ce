use crate::credential::EngineCredential;
use crate::status::TranscriptionResult;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Opaque engine-issued identifier for one recognition operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failure reported by the engine through the callback channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EngineFault(pub String);

/// One callback invocation: either an engine failure or a result
pub type EngineEvent = Result<TranscriptionResult, EngineFault>;

/// Callback invoked by the engine, possibly from its own threads
pub type EngineCallback = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Engine refused to create a session
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model not found at {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("engine credential is missing")]
    MissingCredential,

    #[error("failed to load engine script {}: {reason}", .path.display())]
    Script { path: PathBuf, reason: String },

    #[error("engine rejected the session: {0}")]
    Rejected(String),
}

/// Everything the engine needs to open a transcription session
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub model_path: PathBuf,
    pub model_name: String,
    pub credential: EngineCredential,
    /// Audio file to transcribe; `None` means the default microphone
    pub wav_path: Option<PathBuf>,
    /// Engine diagnostics file
    pub logs_path: Option<PathBuf>,
    /// Bias phrases
    pub phrases: Vec<String>,
}

/// Recognition engine boundary
///
/// All teardown primitives must be no-ops for unknown or already torn-down
/// handles. Callbacks for a handle are delivered in emission order.
pub trait RecognitionEngine: Send + Sync {
    /// Engine name for logging
    fn name(&self) -> &str;

    /// Create an idle transcription session (explicit-object flavor)
    fn create(&self, request: EngineRequest, callback: EngineCallback) -> Result<SessionHandle, EngineError>;

    fn start(&self, handle: SessionHandle);

    fn stop(&self, handle: SessionHandle);

    /// Stop the session and release everything held for the handle
    fn dispose(&self, handle: SessionHandle);

    /// Create and start a transcription session in one call
    fn transcribe(&self, request: EngineRequest, callback: EngineCallback) -> Result<SessionHandle, EngineError>;

    fn untranscribe(&self, handle: SessionHandle);

    /// Start keyword recognition against a model
    fn recognize(&self, model_path: &Path, callback: EngineCallback) -> Result<SessionHandle, EngineError>;

    fn unrecognize(&self, handle: SessionHandle);
}

/// Engine implementation selector
#[derive(Debug, Clone)]
pub enum EngineKind {
    /// Replays a JSON script (see [`super::EngineScript`])
    Scripted(PathBuf),
}

/// Engine factory
pub struct EngineFactory;

impl EngineFactory {
    /// Create the process-wide engine handle
    pub fn create(kind: EngineKind) -> Result<Arc<dyn RecognitionEngine>, EngineError> {
        match kind {
            EngineKind::Scripted(path) => {
                let script = super::EngineScript::load(&path)?;
                Ok(Arc::new(super::ScriptedEngine::new(script)))
            }
        }
    }
}
