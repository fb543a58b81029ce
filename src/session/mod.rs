//! Recognition session management
//!
//! This module maps caller-facing operations onto engine session handles:
//! - Fire-and-forget transcription (`transcribe` / `untranscribe`)
//! - Explicit transcriber objects (`start` / `stop` / `dispose`)
//! - Keyword recognition, repeating or settled once
//! - Cancellation wiring with exactly-once engine teardown

mod config;
mod controller;
mod session;
mod stats;

pub use config::{RecognitionOptions, SessionOptions};
pub use controller::{Recognition, SessionController, Transcriber, Transcription};
pub use stats::{SessionState, SessionStats};

use crate::credential::CredentialError;
use crate::engine::{EngineError, EngineFault};
use thiserror::Error;

/// Failure to open or complete a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("engine could not create the session: {0}")]
    Engine(#[from] EngineError),

    #[error("engine reported a failure: {0}")]
    Fault(#[from] EngineFault),

    #[error("session was cancelled")]
    Cancelled,
}
