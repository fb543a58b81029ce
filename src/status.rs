use serde::{Deserialize, Serialize};
use std::fmt;

/// Status reported by the recognition engine for a session
///
/// Numeric values match the engine wire codes and never change for the
/// lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Started = 1,
    Recognizing = 2,
    Recognized = 3,
    NotRecognized = 4,
    InitialSilenceTimeout = 5,
    EndSilenceTimeout = 6,
    SpeechStartDetected = 7,
    SpeechEndDetected = 8,
    Stopped = 9,
    Error = 10,
    Disposed = 11,
}

impl StatusCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the engine has released the session after this status
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error | Self::Disposed)
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            1 => StatusCode::Started,
            2 => StatusCode::Recognizing,
            3 => StatusCode::Recognized,
            4 => StatusCode::NotRecognized,
            5 => StatusCode::InitialSilenceTimeout,
            6 => StatusCode::EndSilenceTimeout,
            7 => StatusCode::SpeechStartDetected,
            8 => StatusCode::SpeechEndDetected,
            9 => StatusCode::Stopped,
            10 => StatusCode::Error,
            11 => StatusCode::Disposed,
            other => return Err(other),
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "STARTED",
            Self::Recognizing => "RECOGNIZING",
            Self::Recognized => "RECOGNIZED",
            Self::NotRecognized => "NOT_RECOGNIZED",
            Self::InitialSilenceTimeout => "INITIAL_SILENCE_TIMEOUT",
            Self::EndSilenceTimeout => "END_SILENCE_TIMEOUT",
            Self::SpeechStartDetected => "SPEECH_START_DETECTED",
            Self::SpeechEndDetected => "SPEECH_END_DETECTED",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Disposed => "DISPOSED",
        };
        f.write_str(name)
    }
}

/// A single result delivered by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

impl TranscriptionResult {
    pub fn new(status: StatusCode) -> Self {
        Self { status, data: None }
    }

    /// Result carrying recognized or diagnostic text (empty text is dropped)
    pub fn with_data(status: StatusCode, data: impl Into<String>) -> Self {
        let data = data.into();
        Self {
            status,
            data: (!data.is_empty()).then_some(data),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
