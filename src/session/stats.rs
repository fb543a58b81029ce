use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one engine session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Engine accepted the session; nothing started yet
    Created,
    Running,
    Stopped,
    /// Terminal; every later call is a no-op
    Disposed,
}

/// Statistics about a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Engine handle
    pub handle: u64,

    /// Current lifecycle state
    pub state: SessionState,

    /// When the session was last started, if ever
    pub started_at: Option<DateTime<Utc>>,

    /// Number of callbacks forwarded to the caller
    pub events_delivered: usize,

    /// Number of times the session has been started
    pub start_count: usize,
}
