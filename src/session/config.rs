use super::SessionError;
use crate::cancel::CancellationSignal;
use crate::credential::CredentialPolicy;
use crate::engine::EngineRequest;
use hound::WavReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Options for a transcription session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Directory of the packaged acoustic model
    pub model_path: PathBuf,

    /// Model name inside the package
    pub model_name: String,

    /// How the engine credential is obtained
    pub credential: CredentialPolicy,

    /// WAV file to transcribe; `None` uses the live microphone
    pub wav_path: Option<PathBuf>,

    /// Engine diagnostics file
    pub logs_path: Option<PathBuf>,

    /// Phrases the engine should favour
    pub phrases: Vec<String>,

    /// Caller-owned cancellation signal
    pub signal: CancellationSignal,
}

impl SessionOptions {
    pub fn new(model_path: impl Into<PathBuf>, model_name: impl Into<String>, credential: CredentialPolicy) -> Self {
        Self {
            model_path: model_path.into(),
            model_name: model_name.into(),
            credential,
            wav_path: None,
            logs_path: None,
            phrases: Vec::new(),
            signal: CancellationSignal::new(),
        }
    }

    pub fn with_wav_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.wav_path = Some(path.into());
        self
    }

    pub fn with_logs_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.logs_path = Some(path.into());
        self
    }

    pub fn with_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phrases = phrases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_signal(mut self, signal: CancellationSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Validate the options and resolve the credential
    ///
    /// Runs before any engine call; every failure here means the engine is
    /// never contacted.
    pub(crate) fn prepare(&self) -> Result<EngineRequest, SessionError> {
        if self.model_path.as_os_str().is_empty() {
            return Err(SessionError::InvalidOptions("model path is empty".to_string()));
        }
        if self.model_name.trim().is_empty() {
            return Err(SessionError::InvalidOptions("model name is empty".to_string()));
        }
        if let Some(wav_path) = &self.wav_path {
            check_wav(wav_path)?;
        }
        if self.signal.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let credential = self.credential.resolve()?;

        Ok(EngineRequest {
            model_path: self.model_path.clone(),
            model_name: self.model_name.clone(),
            credential,
            wav_path: self.wav_path.clone(),
            logs_path: self.logs_path.clone(),
            phrases: self.phrases.clone(),
        })
    }
}

fn check_wav(path: &Path) -> Result<(), SessionError> {
    let reader = WavReader::open(path)
        .map_err(|e| SessionError::InvalidOptions(format!("cannot read WAV file {}: {}", path.display(), e)))?;

    let spec = reader.spec();
    debug!(
        "Input file {}: {}Hz, {} channels, {} bits",
        path.display(),
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    Ok(())
}

/// Options for a keyword recognition session
#[derive(Debug, Clone)]
pub struct RecognitionOptions {
    /// Keyword model file or directory
    pub model_path: PathBuf,

    /// Caller-owned cancellation signal
    pub signal: CancellationSignal,
}

impl RecognitionOptions {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            signal: CancellationSignal::new(),
        }
    }

    pub fn with_signal(mut self, signal: CancellationSignal) -> Self {
        self.signal = signal;
        self
    }

    pub(crate) fn prepare(&self) -> Result<(), SessionError> {
        if self.model_path.as_os_str().is_empty() {
            return Err(SessionError::InvalidOptions("model path is empty".to_string()));
        }
        if self.signal.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }
}
