pub mod cancel;
pub mod config;
pub mod credential;
pub mod engine;
pub mod session;
pub mod status;

pub use cancel::{CancellationSignal, Subscription};
pub use config::Config;
pub use credential::{
    CredentialError, CredentialMode, CredentialPolicy, DerivedSecret, EncryptedTriple, EngineCredential,
};
pub use engine::{
    EngineCallback, EngineError, EngineEvent, EngineFactory, EngineFault, EngineKind, EngineRequest, EngineScript,
    RecognitionEngine, ScriptStep, ScriptedEngine, SessionHandle,
};
pub use session::{
    Recognition, RecognitionOptions, SessionController, SessionError, SessionOptions, SessionState, SessionStats,
    Transcriber, Transcription,
};
pub use status::{StatusCode, TranscriptionResult};
